//! Pure shading math shared by the deferred passes.
//!
//! Every function here mirrors a WGSL routine under `assets/shaders/` so the
//! lighting, shadow and post-processing rules can be unit tested on the CPU.
//!
//! # Design Principles
//!
//! - **Pure functions**: No ECS, no render world, just math
//! - **Exact match**: Constants and formulas match the shaders exactly
//! - **Testable**: Each function can be unit tested in isolation
//!
//! | Function                   | Shader                          |
//! |----------------------------|---------------------------------|
//! | [`point_attenuation`]      | `deferred_lighting.wgsl`        |
//! | [`directional_shadow_pcf`] | `deferred_lighting.wgsl`        |
//! | [`point_shadow`]           | `deferred_lighting.wgsl`        |
//! | [`bright_pass`]            | `bloom_extract.wgsl`            |
//! | [`BLUR_WEIGHTS`]           | `bloom_blur.wgsl`               |
//! | [`composite`]              | `composite.wgsl`                |
//! | [`present_decode`]         | `present.wgsl`                  |

use bevy::math::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Rec.709 luma weights.
pub const LUMINANCE_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Ambient term as a fraction of albedo.
pub const AMBIENT_STRENGTH: f32 = 0.1;

/// Blinn-Phong shininess exponent.
pub const SPECULAR_SHININESS: f32 = 16.0;

/// Fraction of the radius where the smooth fade-out starts.
pub const FADE_START: f32 = 0.9;

/// Gamma used when encoding the final image.
pub const DISPLAY_GAMMA: f32 = 2.2;

/// Filmic input ceiling (largest finite f16), so `x * x` stays finite.
pub const FILMIC_INPUT_MAX: f32 = 65504.0;

/// Half of a symmetric 9-tap Gaussian kernel (center first).
pub const BLUR_WEIGHTS: [f32; 5] = [0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216];

/// Tone-mapping operator applied by the composite pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToneMapping {
    /// `c / (c + 1)`, ignores exposure.
    Reinhard,
    /// ACES-like fit, scaled by exposure.
    #[default]
    Filmic,
}

impl ToneMapping {
    /// Value of the `mode` field in the composite uniform.
    pub fn shader_index(self) -> u32 {
        match self {
            ToneMapping::Reinhard => 0,
            ToneMapping::Filmic => 1,
        }
    }
}

// =============================================================================
// Lights
// =============================================================================

/// Linear and quadratic falloff coefficients for a point light of `radius`.
pub fn falloff_coefficients(radius: f32) -> (f32, f32) {
    (4.5 / radius, 75.0 / (radius * radius))
}

/// Hermite smoothstep, same as WGSL `smoothstep`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Point light attenuation at `distance`.
///
/// Inverse-distance falloff multiplied by a fade that starts at 90% of the
/// radius and reaches exactly zero at the radius.
pub fn point_attenuation(distance: f32, radius: f32) -> f32 {
    if radius <= 0.0 || distance >= radius {
        return 0.0;
    }
    let (linear, quadratic) = falloff_coefficients(radius);
    let falloff = 1.0 / (1.0 + linear * distance + quadratic * distance * distance);
    let fade = 1.0 - smoothstep(FADE_START * radius, radius, distance);
    falloff * fade
}

/// Brightness multiplier for point lights. Small lights are never dimmed below 1.
pub fn radius_scale(radius: f32) -> f32 {
    radius.max(1.0)
}

// =============================================================================
// Shadows
// =============================================================================

/// Slope-scaled bias for the directional shadow map.
pub fn directional_shadow_bias(n_dot_l: f32) -> f32 {
    (0.005 * (1.0 - n_dot_l)).max(0.0005)
}

/// Slope-scaled bias for point-light cube maps.
pub fn point_shadow_bias(n_dot_l: f32) -> f32 {
    (0.1 * (1.0 - n_dot_l)).max(0.05)
}

/// Square depth texture read by [`directional_shadow_pcf`].
///
/// Reads outside the map return 1.0 (the far plane), so they never occlude.
#[derive(Debug, Clone)]
pub struct ShadowDepthGrid {
    pub size: u32,
    pub depths: Vec<f32>,
}

impl ShadowDepthGrid {
    /// A map where every texel holds `depth`.
    pub fn filled(size: u32, depth: f32) -> Self {
        Self {
            size,
            depths: vec![depth; (size * size) as usize],
        }
    }

    pub fn set(&mut self, x: u32, y: u32, depth: f32) {
        if x < self.size && y < self.size {
            self.depths[(y * self.size + x) as usize] = depth;
        }
    }

    pub fn texel(&self, x: i32, y: i32) -> f32 {
        let size = self.size as i32;
        if x < 0 || y < 0 || x >= size || y >= size {
            return 1.0;
        }
        self.depths[(y * size + x) as usize]
    }
}

/// 3x3 percentage-closer filter over the directional shadow map.
///
/// `proj` is the fragment in shadow-map space: xy in `[0, 1]` texture
/// coordinates, z the depth seen from the light. Returns the shadowed
/// fraction in `[0, 1]`; fragments beyond the far plane (`z > 1`) are lit.
pub fn directional_shadow_pcf(proj: Vec3, bias: f32, map: &ShadowDepthGrid) -> f32 {
    if proj.z > 1.0 {
        return 0.0;
    }
    let size = map.size as f32;
    let cx = (proj.x * size).floor() as i32;
    let cy = (proj.y * size).floor() as i32;

    let mut shadow = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let closest = map.texel(cx + dx, cy + dy);
            if proj.z - bias > closest {
                shadow += 1.0;
            }
        }
    }
    shadow / 9.0
}

/// Binary cube-map shadow test.
///
/// `stored` is the normalized distance read from the cube map, `far` the
/// light's far plane. Returns 1.0 when the fragment is occluded.
pub fn point_shadow(current_distance: f32, stored: f32, far: f32, bias: f32) -> f32 {
    let closest = stored * far;
    if current_distance - bias > closest {
        1.0
    } else {
        0.0
    }
}

// =============================================================================
// Lighting
// =============================================================================

/// One G-buffer texel.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub specular: f32,
}

/// A light as seen by the lighting pass, with its shadow factor already
/// resolved from the shadow maps.
#[derive(Debug, Clone, Copy)]
pub enum ShadedLight {
    Directional {
        /// Direction the light travels (from the light into the scene).
        direction: Vec3,
        color: Vec3,
        shadow: f32,
    },
    Point {
        position: Vec3,
        color: Vec3,
        radius: f32,
        shadow: f32,
    },
}

/// Contribution of a single light to `fragment` seen from `view_position`.
pub fn light_contribution(fragment: &Fragment, view_position: Vec3, light: &ShadedLight) -> Vec3 {
    let normal = fragment.normal.normalize_or_zero();
    let view_dir = (view_position - fragment.position).normalize_or_zero();

    let (light_dir, color, attenuation, shadow, scale) = match *light {
        ShadedLight::Directional {
            direction,
            color,
            shadow,
        } => ((-direction).normalize_or_zero(), color, 1.0, shadow, 1.0),
        ShadedLight::Point {
            position,
            color,
            radius,
            shadow,
        } => {
            let to_light = position - fragment.position;
            let distance = to_light.length();
            let attenuation = point_attenuation(distance, radius);
            if attenuation == 0.0 {
                return Vec3::ZERO;
            }
            (
                to_light.normalize_or_zero(),
                color,
                attenuation,
                shadow,
                radius_scale(radius),
            )
        }
    };

    let n_dot_l = normal.dot(light_dir).max(0.0);
    let diffuse = n_dot_l * fragment.albedo * color;

    let half_dir = (light_dir + view_dir).normalize_or_zero();
    let spec = normal.dot(half_dir).max(0.0).powf(SPECULAR_SHININESS);
    let specular = spec * fragment.specular * color;

    (diffuse + specular) * attenuation * (1.0 - shadow) * scale
}

/// Full lighting for one fragment: flat ambient plus every light's contribution.
pub fn shade_fragment(fragment: &Fragment, view_position: Vec3, lights: &[ShadedLight]) -> Vec3 {
    let ambient = AMBIENT_STRENGTH * fragment.albedo;
    lights.iter().fold(ambient, |acc, light| {
        acc + light_contribution(fragment, view_position, light)
    })
}

// =============================================================================
// Bloom
// =============================================================================

/// Relative luminance of a linear color.
pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMINANCE_WEIGHTS)
}

/// Bright-pass filter. Pixels exactly at the threshold are dropped.
pub fn bright_pass(color: Vec3, threshold: f32) -> Vec4 {
    if luminance(color) > threshold {
        color.extend(1.0)
    } else {
        Vec4::new(0.0, 0.0, 0.0, 1.0)
    }
}

// =============================================================================
// Composite
// =============================================================================

pub fn reinhard(color: Vec3) -> Vec3 {
    color / (color + Vec3::ONE)
}

pub fn filmic(color: Vec3, exposure: f32) -> Vec3 {
    let x = (color * exposure).min(Vec3::splat(FILMIC_INPUT_MAX));
    let numerator = x * (2.51 * x + Vec3::splat(0.03));
    let denominator = x * (2.43 * x + Vec3::splat(0.59)) + Vec3::splat(0.14);
    (numerator / denominator).clamp(Vec3::ZERO, Vec3::ONE)
}

pub fn gamma_encode(color: Vec3) -> Vec3 {
    color.powf(1.0 / DISPLAY_GAMMA)
}

/// Exact sRGB decode applied by the present blit. The sRGB view target
/// encodes on write, so the displayed value equals the composite output.
pub fn present_decode(color: Vec3) -> Vec3 {
    let decode = |c: f32| {
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    Vec3::new(decode(color.x), decode(color.y), decode(color.z))
}

/// Final display color for one pixel.
pub fn composite(
    hdr: Vec3,
    bloom: Vec3,
    bloom_intensity: f32,
    exposure: f32,
    tone_mapping: ToneMapping,
) -> Vec4 {
    let combined = hdr + bloom * bloom_intensity;
    let mapped = match tone_mapping {
        ToneMapping::Reinhard => reinhard(combined),
        ToneMapping::Filmic => filmic(combined, exposure),
    };
    gamma_encode(mapped).extend(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-4
    }

    #[test]
    fn test_attenuation_zero_at_and_beyond_radius() {
        for radius in [0.5, 1.0, 5.0, 12.0, 100.0] {
            assert_eq!(point_attenuation(radius, radius), 0.0);
            assert_eq!(point_attenuation(radius * 1.01, radius), 0.0);
            assert_eq!(point_attenuation(radius * 10.0, radius), 0.0);
        }
    }

    #[test]
    fn test_attenuation_monotonic_and_continuous() {
        for radius in [1.0_f32, 3.0, 10.0, 40.0] {
            let steps = 2000;
            let mut previous = point_attenuation(0.0, radius);
            assert!((previous - 1.0).abs() < EPS, "attenuation at the light is 1");
            for i in 1..=steps {
                let d = radius * i as f32 / steps as f32;
                let a = point_attenuation(d, radius);
                assert!(a <= previous + EPS, "not monotonic at d={} r={}", d, radius);
                // No pops: a step of r/2000 never moves attenuation by more than 1%.
                assert!((previous - a).abs() < 0.01, "jump at d={} r={}", d, radius);
                previous = a;
            }
            assert_eq!(previous, 0.0);
        }
    }

    #[test]
    fn test_attenuation_fade_start_is_seamless() {
        let radius = 10.0;
        let start = FADE_START * radius;
        let below = point_attenuation(start - 1e-3, radius);
        let above = point_attenuation(start + 1e-3, radius);
        assert!((below - above).abs() < 1e-3);
    }

    #[test]
    fn test_point_light_beyond_radius_contributes_nothing() {
        let fragment = Fragment {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            albedo: Vec3::ONE,
            specular: 1.0,
        };
        let light = ShadedLight::Point {
            position: Vec3::new(0.0, 5.0, 0.0),
            color: Vec3::splat(100.0),
            radius: 5.0,
            shadow: 0.0,
        };
        assert_eq!(light_contribution(&fragment, Vec3::new(0.0, 3.0, 3.0), &light), Vec3::ZERO);
    }

    #[test]
    fn test_radius_scale_only_boosts() {
        assert_eq!(radius_scale(0.25), 1.0);
        assert_eq!(radius_scale(1.0), 1.0);
        assert_eq!(radius_scale(7.5), 7.5);
    }

    #[test]
    fn test_shadow_biases() {
        assert!((directional_shadow_bias(0.0) - 0.005).abs() < EPS);
        assert!((directional_shadow_bias(1.0) - 0.0005).abs() < EPS);
        assert!((point_shadow_bias(0.0) - 0.1).abs() < EPS);
        assert!((point_shadow_bias(1.0) - 0.05).abs() < EPS);
        assert!((point_shadow_bias(0.8) - 0.05).abs() < EPS);
    }

    #[test]
    fn test_pcf_beyond_far_plane_is_lit() {
        // A map that occludes everything.
        let map = ShadowDepthGrid::filled(16, 0.0);
        for z in [1.0001, 1.5, 10.0] {
            let proj = Vec3::new(0.5, 0.5, z);
            assert_eq!(directional_shadow_pcf(proj, 0.0005, &map), 0.0);
        }
    }

    #[test]
    fn test_pcf_fully_occluded_and_partial() {
        let map = ShadowDepthGrid::filled(16, 0.2);
        let proj = Vec3::new(0.5, 0.5, 0.6);
        assert_eq!(directional_shadow_pcf(proj, 0.0005, &map), 1.0);

        // Open up one column of the 3x3 kernel.
        let mut partial = ShadowDepthGrid::filled(16, 0.2);
        for y in 7..=9 {
            partial.set(9, y, 1.0);
        }
        let shadow = directional_shadow_pcf(proj, 0.0005, &partial);
        assert!((shadow - 6.0 / 9.0).abs() < EPS);
    }

    #[test]
    fn test_pcf_outside_map_reads_far_plane() {
        let map = ShadowDepthGrid::filled(8, 0.0);
        let proj = Vec3::new(-2.0, -2.0, 0.5);
        assert_eq!(directional_shadow_pcf(proj, 0.0005, &map), 0.0);
    }

    #[test]
    fn test_point_shadow_compare() {
        // Occluder at 4 units, fragment at 6 units, far plane 10.
        assert_eq!(point_shadow(6.0, 0.4, 10.0, 0.05), 1.0);
        // The surface that wrote the map is not self-shadowed.
        assert_eq!(point_shadow(4.02, 0.4, 10.0, 0.05), 0.0);
    }

    #[test]
    fn test_directional_flat_quad_scenario() {
        let fragment = Fragment {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            albedo: Vec3::splat(0.8),
            specular: 0.0,
        };
        let direction = Vec3::new(0.3, -1.0, 0.2).normalize();
        let light = ShadedLight::Directional {
            direction,
            color: Vec3::ONE,
            shadow: 0.0,
        };
        let lit = shade_fragment(&fragment, Vec3::new(0.0, 2.0, 5.0), &[light]);
        let n_dot_l = Vec3::Y.dot(-direction);
        let expected = Vec3::splat(0.08) + Vec3::splat(0.8) * n_dot_l;
        assert!(approx(lit, expected), "lit={:?} expected={:?}", lit, expected);
    }

    #[test]
    fn test_full_shadow_leaves_only_ambient() {
        let fragment = Fragment {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            albedo: Vec3::splat(0.5),
            specular: 1.0,
        };
        let light = ShadedLight::Directional {
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            shadow: 1.0,
        };
        let lit = shade_fragment(&fragment, Vec3::new(0.0, 5.0, 0.0), &[light]);
        assert!(approx(lit, Vec3::splat(0.05)));
    }

    #[test]
    fn test_degenerate_normal_stays_finite() {
        // Known boundary: a zero normal renders as ambient only rather than failing.
        let fragment = Fragment {
            position: Vec3::ZERO,
            normal: Vec3::ZERO,
            albedo: Vec3::ONE,
            specular: 1.0,
        };
        let lights = [
            ShadedLight::Directional {
                direction: Vec3::NEG_Y,
                color: Vec3::ONE,
                shadow: 0.0,
            },
            ShadedLight::Point {
                position: Vec3::new(1.0, 1.0, 0.0),
                color: Vec3::ONE,
                radius: 5.0,
                shadow: 0.0,
            },
        ];
        let lit = shade_fragment(&fragment, Vec3::Z, &lights);
        assert!(lit.is_finite());
        assert!(approx(lit, Vec3::splat(AMBIENT_STRENGTH)));
    }

    #[test]
    fn test_bright_pass_threshold_is_strict() {
        // Pure grey has luminance equal to its channel value.
        let at = Vec3::splat(0.5);
        assert!((luminance(at) - 0.5).abs() < EPS);
        assert_eq!(bright_pass(at, luminance(at)), Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(bright_pass(Vec3::splat(0.51), 0.5), Vec4::new(0.51, 0.51, 0.51, 1.0));
    }

    #[test]
    fn test_blur_weights_preserve_energy() {
        let total = BLUR_WEIGHTS[0] + 2.0 * BLUR_WEIGHTS[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_reinhard_limits() {
        assert_eq!(reinhard(Vec3::ZERO), Vec3::ZERO);
        let mut previous = 0.0;
        for value in [0.5, 1.0, 10.0, 1e3, 1e6, 1e30] {
            let mapped = reinhard(Vec3::splat(value)).x;
            assert!(mapped <= 1.0);
            assert!(mapped >= previous);
            previous = mapped;
        }
        assert!(previous > 0.999);
    }

    #[test]
    fn test_filmic_is_clamped() {
        for exposure in [0.01, 0.5, 1.0, 4.0, 100.0] {
            for value in [0.0, 0.001, 0.2, 1.0, 5.0, 1e4, 1e12] {
                let mapped = filmic(Vec3::splat(value), exposure);
                assert!(mapped.min_element() >= 0.0, "{value} @ {exposure}");
                assert!(mapped.max_element() <= 1.0, "{value} @ {exposure}");
            }
        }
    }

    #[test]
    fn test_filmic_saturates_for_huge_and_infinite_input() {
        let huge = filmic(Vec3::splat(1e19), 1.0);
        assert_eq!(huge, Vec3::ONE);
        assert_eq!(filmic(Vec3::splat(1e20), 1.0), huge);
        assert_eq!(filmic(Vec3::splat(f32::INFINITY), 1.0), huge);
        assert_eq!(filmic(Vec3::splat(f32::MAX), 2.0), huge);

        let mut previous = 0.0;
        for value in [1.0, 10.0, 1e3, FILMIC_INPUT_MAX, 1e6, 1e30, f32::INFINITY] {
            let mapped = filmic(Vec3::splat(value), 1.0).x;
            assert!(mapped.is_finite(), "{value}");
            assert!(mapped >= previous, "{value}");
            previous = mapped;
        }
    }

    #[test]
    fn test_present_round_trips_through_srgb_target() {
        use bevy::color::{LinearRgba, Srgba};

        for value in [0.0, 0.02, 0.04045, 0.05, 0.1, 0.2, 0.5, 0.73, 1.0] {
            let decoded = present_decode(Vec3::splat(value));
            let stored = Srgba::from(LinearRgba::rgb(decoded.x, decoded.y, decoded.z));
            assert!((stored.red - value).abs() < 1e-4, "{value} -> {}", stored.red);
            assert!((stored.blue - value).abs() < 1e-4, "{value} -> {}", stored.blue);
        }

        // What reaches the screen is the composite output itself.
        for hdr in [0.01, 0.3, 2.0] {
            let out = composite(Vec3::splat(hdr), Vec3::ZERO, 0.0, 1.0, ToneMapping::Filmic);
            let decoded = present_decode(out.truncate());
            let stored = Srgba::from(LinearRgba::rgb(decoded.x, decoded.y, decoded.z));
            assert!((stored.green - out.y).abs() < 1e-4, "{hdr}");
        }
    }

    #[test]
    fn test_composite_alpha_and_gamma() {
        let out = composite(Vec3::ONE, Vec3::ZERO, 1.0, 1.0, ToneMapping::Reinhard);
        assert_eq!(out.w, 1.0);
        assert!((out.x - 0.5_f32.powf(1.0 / 2.2)).abs() < EPS);

        // Zero bloom intensity ignores the bloom buffer entirely.
        let a = composite(Vec3::splat(0.3), Vec3::splat(50.0), 0.0, 1.0, ToneMapping::Filmic);
        let b = composite(Vec3::splat(0.3), Vec3::ZERO, 1.0, 1.0, ToneMapping::Filmic);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tone_mapping_shader_index() {
        assert_eq!(ToneMapping::Reinhard.shader_index(), 0);
        assert_eq!(ToneMapping::Filmic.shader_index(), 1);
        assert_eq!(ToneMapping::default(), ToneMapping::Filmic);
    }
}
