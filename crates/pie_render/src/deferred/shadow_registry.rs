//! Shadow-map slot assignment for point lights.
//!
//! Point light cube shadow maps live in one texture array with a fixed number
//! of slots. [`PointShadowRegistry`] hands those slots out: it is configured
//! once with a slot count, then lights register to receive a [`ShadowSlot`].
//!
//! Slots are an arena with a free list. A slot never moves while its light is
//! registered, and freed slots are reused lowest index first.
//!
//! ```rust,ignore
//! fn setup(mut commands: Commands, mut registry: ResMut<PointShadowRegistry>) {
//!     let light = commands
//!         .spawn((DeferredLight::point(Color::WHITE, 12.0).with_shadows(), Transform::default()))
//!         .id();
//!     if let Err(err) = registry.assign(&mut commands, light) {
//!         warn!("light {light} renders without shadows: {err}");
//!     }
//! }
//! ```

use bevy::prelude::*;
use bevy::render::Extract;

/// Upper bound on concurrently shadow-casting point lights.
pub const MAX_SHADOW_CASTING_POINT_LIGHTS: usize = 8;

/// Index of a point light's cube map in the shadow texture array.
///
/// Only [`PointShadowRegistry`] creates these. Removing the component (or
/// despawning the light) returns the slot to the pool.
#[derive(Component, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShadowSlot(u32);

impl ShadowSlot {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Errors from configuring the registry or registering lights.
///
/// Every failing call leaves the registry exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowConfigError {
    /// `register` was called before `configure`.
    NotConfigured,
    /// `configure` asked for more slots than the renderer supports.
    CountExceedsMaximum { requested: usize, maximum: usize },
    /// `configure` was called while lights still hold slots.
    LightsRegistered { registered: usize },
    /// Every configured slot is taken.
    SlotsExhausted { capacity: usize },
    /// The entity already owns a slot.
    AlreadyRegistered { entity: Entity, slot: u32 },
}

impl std::fmt::Display for ShadowConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowConfigError::NotConfigured => {
                write!(f, "point shadow slots have not been configured")
            }
            ShadowConfigError::CountExceedsMaximum { requested, maximum } => write!(
                f,
                "requested {} point shadow slots, maximum is {}",
                requested, maximum
            ),
            ShadowConfigError::LightsRegistered { registered } => write!(
                f,
                "cannot reconfigure point shadow slots while {} lights are registered",
                registered
            ),
            ShadowConfigError::SlotsExhausted { capacity } => {
                write!(f, "all {} point shadow slots are in use", capacity)
            }
            ShadowConfigError::AlreadyRegistered { entity, slot } => {
                write!(f, "entity {} already owns point shadow slot {}", entity, slot)
            }
        }
    }
}

impl std::error::Error for ShadowConfigError {}

/// Pool of point-light shadow slots (main world).
#[derive(Resource, Debug, Default)]
pub struct PointShadowRegistry {
    configured: bool,
    /// Owner of each slot.
    owners: Vec<Option<Entity>>,
    /// Free slot indices, highest first so `pop` yields the lowest.
    free: Vec<u32>,
}

impl PointShadowRegistry {
    /// Registry with `count` slots already configured.
    pub fn with_slots(count: usize) -> Result<Self, ShadowConfigError> {
        let mut registry = Self::default();
        registry.configure(count)?;
        Ok(registry)
    }

    /// Set the number of slots. Must happen before any light registers.
    pub fn configure(&mut self, count: usize) -> Result<(), ShadowConfigError> {
        if count > MAX_SHADOW_CASTING_POINT_LIGHTS {
            return Err(ShadowConfigError::CountExceedsMaximum {
                requested: count,
                maximum: MAX_SHADOW_CASTING_POINT_LIGHTS,
            });
        }
        let registered = self.registered_count();
        if registered > 0 {
            return Err(ShadowConfigError::LightsRegistered { registered });
        }

        self.configured = true;
        self.owners = vec![None; count];
        self.free = (0..count as u32).rev().collect();
        info!("Point shadow slots configured: {}", count);
        Ok(())
    }

    /// Reserve a slot for `entity`.
    pub fn register(&mut self, entity: Entity) -> Result<ShadowSlot, ShadowConfigError> {
        if !self.configured {
            return Err(ShadowConfigError::NotConfigured);
        }
        if let Some(slot) = self.slot_of(entity) {
            return Err(ShadowConfigError::AlreadyRegistered {
                entity,
                slot: slot.0,
            });
        }
        let Some(slot) = self.free.pop() else {
            return Err(ShadowConfigError::SlotsExhausted {
                capacity: self.capacity(),
            });
        };
        self.owners[slot as usize] = Some(entity);
        debug!("Point shadow slot {} -> {}", slot, entity);
        Ok(ShadowSlot(slot))
    }

    /// Register `entity` and insert its [`ShadowSlot`] component.
    pub fn assign(
        &mut self,
        commands: &mut Commands,
        entity: Entity,
    ) -> Result<ShadowSlot, ShadowConfigError> {
        let slot = self.register(entity)?;
        commands.entity(entity).insert(slot);
        Ok(slot)
    }

    /// Return `entity`'s slot to the pool.
    pub fn release(&mut self, entity: Entity) -> Option<ShadowSlot> {
        let slot = self.slot_of(entity)?;
        self.owners[slot.0 as usize] = None;
        self.free.push(slot.0);
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        Some(slot)
    }

    pub fn slot_of(&self, entity: Entity) -> Option<ShadowSlot> {
        self.owners
            .iter()
            .position(|owner| *owner == Some(entity))
            .map(|index| ShadowSlot(index as u32))
    }

    /// `slot` if the registry issued it to `entity`. Slot components copied
    /// onto other entities are rejected.
    pub fn owned_slot(&self, entity: Entity, slot: ShadowSlot) -> Option<ShadowSlot> {
        (self.slot_of(entity) == Some(slot)).then_some(slot)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Configured slot count (0 before `configure`).
    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    pub fn registered_count(&self) -> usize {
        self.owners.iter().filter(|owner| owner.is_some()).count()
    }
}

/// Frees the slots of lights whose [`ShadowSlot`] went away.
pub fn release_removed_shadow_slots(
    mut removed: RemovedComponents<ShadowSlot>,
    mut registry: ResMut<PointShadowRegistry>,
) {
    for entity in removed.read() {
        if let Some(slot) = registry.release(entity) {
            debug!("Released point shadow slot {} from {}", slot.index(), entity);
        }
    }
}

/// Slot count mirrored into the render world, sizes the cube map array.
#[derive(Resource, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PointShadowCapacity(pub u32);

pub fn extract_point_shadow_capacity(
    mut commands: Commands,
    registry: Extract<Res<PointShadowRegistry>>,
) {
    commands.insert_resource(PointShadowCapacity(registry.capacity() as u32));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities(count: u32) -> Vec<Entity> {
        let mut world = World::new();
        (0..count).map(|_| world.spawn_empty().id()).collect()
    }

    #[test]
    fn test_register_before_configure_fails() {
        let lights = entities(1);
        let mut registry = PointShadowRegistry::default();
        assert_eq!(
            registry.register(lights[0]),
            Err(ShadowConfigError::NotConfigured)
        );
        assert_eq!(registry.registered_count(), 0);
    }

    #[test]
    fn test_configure_above_maximum_fails() {
        let mut registry = PointShadowRegistry::default();
        assert_eq!(
            registry.configure(MAX_SHADOW_CASTING_POINT_LIGHTS + 1),
            Err(ShadowConfigError::CountExceedsMaximum {
                requested: 9,
                maximum: 8
            })
        );
        assert!(!registry.is_configured());
        assert!(registry.configure(MAX_SHADOW_CASTING_POINT_LIGHTS).is_ok());
    }

    #[test]
    fn test_slots_are_sequential_and_unique() {
        let lights = entities(4);
        let mut registry = PointShadowRegistry::with_slots(4).unwrap();
        let slots: Vec<u32> = lights
            .iter()
            .map(|e| registry.register(*e).unwrap().index())
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_overflow_is_rejected_without_corruption() {
        let lights = entities(4);
        let mut registry = PointShadowRegistry::with_slots(3).unwrap();
        for light in &lights[..3] {
            registry.register(*light).unwrap();
        }
        let before: Vec<_> = lights[..3].iter().map(|e| registry.slot_of(*e)).collect();

        for _ in 0..3 {
            assert_eq!(
                registry.register(lights[3]),
                Err(ShadowConfigError::SlotsExhausted { capacity: 3 })
            );
        }

        let after: Vec<_> = lights[..3].iter().map(|e| registry.slot_of(*e)).collect();
        assert_eq!(before, after);
        assert_eq!(registry.slot_of(lights[3]), None);
        assert_eq!(registry.registered_count(), 3);
    }

    #[test]
    fn test_release_reuses_lowest_slot() {
        let lights = entities(5);
        let mut registry = PointShadowRegistry::with_slots(4).unwrap();
        for light in &lights[..4] {
            registry.register(*light).unwrap();
        }
        assert_eq!(registry.release(lights[2]).map(ShadowSlot::index), Some(2));
        assert_eq!(registry.release(lights[0]).map(ShadowSlot::index), Some(0));
        assert_eq!(registry.release(lights[0]), None);

        assert_eq!(registry.register(lights[4]).unwrap().index(), 0);
        assert_eq!(registry.register(lights[2]).unwrap().index(), 2);
        assert_eq!(registry.slot_of(lights[1]).map(ShadowSlot::index), Some(1));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let lights = entities(1);
        let mut registry = PointShadowRegistry::with_slots(2).unwrap();
        registry.register(lights[0]).unwrap();
        assert_eq!(
            registry.register(lights[0]),
            Err(ShadowConfigError::AlreadyRegistered {
                entity: lights[0],
                slot: 0
            })
        );
        assert_eq!(registry.registered_count(), 1);
    }

    #[test]
    fn test_reconfigure_requires_empty_registry() {
        let lights = entities(1);
        let mut registry = PointShadowRegistry::with_slots(2).unwrap();
        registry.register(lights[0]).unwrap();
        assert_eq!(
            registry.configure(8),
            Err(ShadowConfigError::LightsRegistered { registered: 1 })
        );
        assert_eq!(registry.capacity(), 2);

        registry.release(lights[0]);
        assert!(registry.configure(8).is_ok());
        assert_eq!(registry.capacity(), 8);
    }

    #[test]
    fn test_owned_slot_rejects_copied_component() {
        let lights = entities(2);
        let mut registry = PointShadowRegistry::with_slots(2).unwrap();
        let slot = registry.register(lights[0]).unwrap();

        assert_eq!(registry.owned_slot(lights[0], slot), Some(slot));
        assert_eq!(registry.owned_slot(lights[1], slot), None);

        registry.release(lights[0]);
        assert_eq!(registry.owned_slot(lights[0], slot), None);
    }

    #[test]
    fn test_zero_slots_rejects_every_light() {
        let lights = entities(1);
        let mut registry = PointShadowRegistry::with_slots(0).unwrap();
        assert_eq!(
            registry.register(lights[0]),
            Err(ShadowConfigError::SlotsExhausted { capacity: 0 })
        );
    }
}
