use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    clock::TickClock,
    components::Position,
    domains::{
        AbilityFlags, AbilityRecord, BandFlags, BandRecord, ConstructionFlags, ConstructionRecord,
        CreatureFlags, CreatureRecord, LogisticsFlags, LogisticsPriority, LogisticsRequest,
        MiracleFlags, MiraclePhase, MiracleRecord, ResourceFlags, ResourceNode, SpawnerFlags,
        SpawnerRecord, StorehouseFlags, StorehouseRecord, VillagerFlags, VillagerJob,
        VillagerRecord,
    },
    hashing::object_seed,
    identity::{IdentityAllocator, StableId},
    scalar::Scalar,
    spatial::SpatialIndex,
};

#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioSettings {
    pub seed: u64,
    pub villagers: u32,
    pub bands: u32,
    pub creatures: u32,
    pub spawners: u32,
    pub resource_nodes: u32,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            villagers: 24,
            bands: 3,
            creatures: 6,
            spawners: 2,
            resource_nodes: 8,
        }
    }
}

fn object_rng(seed: u64, tick: u64, id: StableId) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(object_seed(seed, tick, id.raw()))
}

/// World-space extent of the configured grid.
fn world_extent(world: &World) -> Scalar {
    let layout = world.resource::<SpatialIndex>().layout();
    layout.cell_size * Scalar::from_u32(layout.width.min(layout.height))
}

fn random_position(rng: &mut ChaCha8Rng, extent: Scalar) -> Position {
    let max = extent.raw().max(1);
    Position::new(
        Scalar::from_raw(rng.gen_range(0..max)),
        Scalar::from_raw(rng.gen_range(0..max)),
    )
}

fn wander(rng: &mut ChaCha8Rng, position: &mut Position, extent: Scalar) {
    let step = Scalar::SCALE / 2;
    let dx = Scalar::from_raw(rng.gen_range(-step..=step));
    let dy = Scalar::from_raw(rng.gen_range(-step..=step));
    let upper = extent - Scalar::from_raw(1);
    let moved = position.offset(dx, dy);
    *position = Position::new(
        moved.x.clamp(Scalar::zero(), upper),
        moved.y.clamp(Scalar::zero(), upper),
    );
}

fn spawn_object(world: &mut World, bundle: impl Bundle) -> StableId {
    let id = world.resource_mut::<IdentityAllocator>().allocate();
    world.spawn((id, bundle));
    id
}

/// Populate the world with one object or more of every domain.
pub fn seed_scenario(world: &mut World, settings: ScenarioSettings) {
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let extent = world_extent(world);

    let mut bands = Vec::new();
    for faction in 0..settings.bands {
        let position = random_position(&mut rng, extent);
        let band = spawn_object(
            world,
            (
                BandRecord {
                    faction,
                    member_count: rng.gen_range(4..20),
                    morale: Scalar::from_raw(rng.gen_range(500_000..=1_000_000)),
                    flags: BandFlags::empty(),
                },
                position,
            ),
        );
        bands.push(band);
    }

    let jobs = [
        VillagerJob::Idle,
        VillagerJob::Farmer,
        VillagerJob::Builder,
        VillagerJob::Hauler,
        VillagerJob::Worshipper,
    ];
    for index in 0..settings.villagers {
        let position = random_position(&mut rng, extent);
        let band = (!bands.is_empty()).then(|| bands[index as usize % bands.len()]);
        let villager = spawn_object(
            world,
            (
                VillagerRecord {
                    job: jobs[rng.gen_range(0..jobs.len())],
                    health: Scalar::from_i64(10),
                    band,
                    flags: VillagerFlags::empty(),
                },
                position,
            ),
        );
        if index % 4 == 0 {
            spawn_object(
                world,
                AbilityRecord {
                    owner: villager,
                    ability_id: rng.gen_range(1..6),
                    cooldown_ticks: rng.gen_range(0..10),
                    charges: 2,
                    flags: AbilityFlags::empty(),
                },
            );
        }
    }

    for _ in 0..settings.creatures {
        let position = random_position(&mut rng, extent);
        let hostile = rng.gen_bool(0.5);
        spawn_object(
            world,
            (
                CreatureRecord {
                    species: rng.gen_range(1..4),
                    health: Scalar::from_i64(20),
                    threat: rng.gen_range(1..10),
                    flags: if hostile {
                        CreatureFlags::HOSTILE
                    } else {
                        CreatureFlags::empty()
                    },
                },
                position,
            ),
        );
    }

    for archetype in 0..settings.spawners {
        let position = random_position(&mut rng, extent);
        spawn_object(
            world,
            (
                SpawnerRecord {
                    archetype,
                    cooldown_ticks: rng.gen_range(0..5),
                    interval_ticks: 6,
                    spawned: 0,
                    capacity: 4,
                    flags: SpawnerFlags::ACTIVE | SpawnerFlags::HOSTILE_SPAWNS,
                },
                position,
            ),
        );
    }

    for _ in 0..settings.resource_nodes {
        let position = random_position(&mut rng, extent);
        spawn_object(
            world,
            (
                ResourceNode {
                    resource_type: rng.gen_range(1..4),
                    units: rng.gen_range(20..80),
                    capacity: 80,
                    flags: ResourceFlags::RENEWABLE,
                },
                position,
            ),
        );
    }

    let store_position = random_position(&mut rng, extent);
    spawn_object(
        world,
        (
            StorehouseRecord {
                capacity: 400,
                stored: 50,
                reserved: 0,
                flags: StorehouseFlags::empty(),
            },
            store_position,
        ),
    );
    spawn_object(
        world,
        (
            ConstructionRecord {
                blueprint: 1,
                progress: Scalar::zero(),
                required_work: Scalar::from_i64(40),
                flags: ConstructionFlags::empty(),
            },
            random_position(&mut rng, extent),
        ),
    );
    spawn_object(
        world,
        LogisticsRequest {
            resource: 1,
            requested_units: 120,
            assigned_units: 0,
            fulfilled_units: 0,
            priority: LogisticsPriority::Normal,
            flags: LogisticsFlags::empty(),
        },
    );
    if let Some(caster) = bands.first().copied() {
        spawn_object(
            world,
            (
                MiracleRecord {
                    kind: 1,
                    caster,
                    charge: Scalar::zero(),
                    radius: Scalar::from_i64(12),
                    phase: MiraclePhase::Charging,
                    flags: MiracleFlags::empty(),
                },
                store_position,
            ),
        );
    }

    tracing::info!(
        target: "sim_registry::scenario",
        seed = settings.seed,
        objects = world.resource::<IdentityAllocator>().peek_next() - 1,
        "scenario.seeded"
    );
}

/// Advance every scenario object by one tick.
pub fn drive_scenario(world: &mut World) {
    let Some(settings) = world.get_resource::<ScenarioSettings>().copied() else {
        return;
    };
    let tick = world.resource::<TickClock>().current_tick();
    let extent = world_extent(world);
    let seed = settings.seed;

    let mut bands = world.query::<(&StableId, &mut BandRecord, Option<&mut Position>)>();
    for (id, mut band, position) in bands.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        let jitter = Scalar::from_raw(rng.gen_range(-40_000..=40_000));
        band.morale = (band.morale + jitter).clamp(Scalar::zero(), Scalar::one());
        if rng.gen_bool(0.1) {
            band.flags.toggle(BandFlags::ENGAGED);
        }
        let routed = band.morale < Scalar::from_f32(0.2);
        band.flags.set(BandFlags::ROUTED, routed);
        if let Some(mut position) = position {
            band.flags.insert(BandFlags::MOVING);
            wander(&mut rng, &mut position, extent);
        }
    }

    let mut villagers = world.query::<(&StableId, &mut VillagerRecord, Option<&mut Position>)>();
    for (id, mut villager, position) in villagers.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        if rng.gen_bool(0.05) {
            villager.job = match villager.job {
                VillagerJob::Idle => VillagerJob::Hauler,
                VillagerJob::Hauler => VillagerJob::Builder,
                VillagerJob::Builder => VillagerJob::Farmer,
                VillagerJob::Farmer => VillagerJob::Worshipper,
                VillagerJob::Worshipper => VillagerJob::Idle,
            };
        }
        villager.flags.set(VillagerFlags::FLEEING, rng.gen_bool(0.03));
        if let Some(mut position) = position {
            wander(&mut rng, &mut position, extent);
        }
    }

    let mut creatures = world.query::<(&StableId, &mut CreatureRecord, Option<&mut Position>)>();
    for (id, mut creature, position) in creatures.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        creature.threat = (creature.threat as i64 + rng.gen_range(-1..=1)).clamp(0, 20) as u32;
        if let Some(mut position) = position {
            wander(&mut rng, &mut position, extent);
        }
    }

    let mut abilities = world.query::<&mut AbilityRecord>();
    for mut ability in abilities.iter_mut(world) {
        ability.cooldown_ticks = ability.cooldown_ticks.saturating_sub(1);
    }

    let mut constructions = world.query::<(&StableId, &mut ConstructionRecord)>();
    for (id, mut site) in constructions.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        if rng.gen_bool(0.1) {
            site.flags.toggle(ConstructionFlags::STALLED);
        }
        if !site.flags.contains(ConstructionFlags::STALLED) && site.progress < site.required_work {
            site.progress += Scalar::from_raw(rng.gen_range(0..=Scalar::SCALE));
        }
    }

    let mut resources = world.query::<(&StableId, &mut ResourceNode)>();
    for (id, mut node) in resources.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        node.units = node.units.saturating_sub(rng.gen_range(0..3));
        node.flags.set(ResourceFlags::RESERVED, rng.gen_bool(0.2));
    }

    let mut storehouses = world.query::<(&StableId, &mut StorehouseRecord)>();
    for (id, mut store) in storehouses.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        let deposit = rng.gen_range(0..4);
        store.stored = (store.stored + deposit).min(store.capacity);
        store.reserved = rng.gen_range(0..=store.capacity - store.stored);
    }

    let mut requests = world.query::<(&StableId, &mut LogisticsRequest)>();
    for (id, mut request) in requests.iter_mut(world) {
        let mut rng = object_rng(seed, tick, *id);
        let remaining = request.requested_units - request.fulfilled_units;
        if request.assigned_units == 0 && remaining > 0 && rng.gen_bool(0.3) {
            request.assigned_units = remaining.min(20);
        } else if request.assigned_units > 0 {
            let delivered = rng.gen_range(0..=request.assigned_units.min(remaining));
            request.fulfilled_units += delivered;
            request.assigned_units -= delivered;
        }
        let urgent = request.fulfilled_units * 2 < request.requested_units && tick > 30;
        request.flags.set(LogisticsFlags::URGENT, urgent);
        if urgent {
            request.priority = request.priority.max(LogisticsPriority::High);
        }
    }

    let mut miracles = world.query::<&mut MiracleRecord>();
    for mut miracle in miracles.iter_mut(world) {
        match miracle.phase {
            MiraclePhase::Charging => {
                miracle.charge += Scalar::from_f32(0.1);
                if miracle.charge >= Scalar::one() {
                    miracle.phase = MiraclePhase::Active;
                }
            }
            MiraclePhase::Active => miracle.phase = MiraclePhase::Sustained,
            MiraclePhase::Sustained => {
                miracle.charge -= Scalar::from_f32(0.25);
                if miracle.charge <= Scalar::zero() {
                    miracle.charge = Scalar::zero();
                    miracle.phase = MiraclePhase::Fading;
                }
            }
            MiraclePhase::Fading => miracle.phase = MiraclePhase::Charging,
        }
    }

    run_spawners(world, tick);
}

fn run_spawners(world: &mut World, tick: u64) {
    let mut ready: Vec<(StableId, Option<Position>, u32)> = Vec::new();
    let mut spawners = world.query::<(&StableId, &mut SpawnerRecord, Option<&Position>)>();
    for (id, mut spawner, position) in spawners.iter_mut(world) {
        spawner.cooldown_ticks = spawner.cooldown_ticks.saturating_sub(1);
        if spawner.is_ready() {
            spawner.spawned += 1;
            spawner.cooldown_ticks = spawner.interval_ticks;
            ready.push((*id, position.copied(), spawner.archetype));
        }
    }
    // Identities are handed out in spawner order, not query order.
    ready.sort_unstable_by_key(|(id, _, _)| *id);
    for (spawner, position, archetype) in ready {
        let creature = CreatureRecord {
            species: archetype + 100,
            health: Scalar::from_i64(8),
            threat: 3,
            flags: CreatureFlags::HOSTILE | CreatureFlags::SPAWNED,
        };
        let id = match position {
            Some(position) => spawn_object(world, (creature, position)),
            None => spawn_object(world, creature),
        };
        log::debug!("scenario.spawn tick={tick} spawner={spawner} creature={id}");
    }
}
