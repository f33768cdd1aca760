pub mod abilities;
pub mod bands;
pub mod constructions;
pub mod creatures;
pub mod logistics;
pub mod miracles;
pub mod resources;
pub mod spawners;
pub mod storehouses;
pub mod villagers;

use bevy::prelude::*;

use crate::{
    rebuild::{install_registry, rebuild_registry, Domain},
    snapshot::DomainCatalog,
    TickPhase,
};

pub use abilities::{AbilityFlags, AbilityRecord, AbilityRegistry, AbilityRegistrySummary};
pub use bands::{BandFlags, BandRecord, BandRegistry, BandRegistrySummary};
pub use constructions::{
    ConstructionFlags, ConstructionRecord, ConstructionRegistry, ConstructionRegistrySummary,
};
pub use creatures::{CreatureFlags, CreatureRecord, CreatureRegistry, CreatureRegistrySummary};
pub use logistics::{
    LogisticsFlags, LogisticsPriority, LogisticsRegistry, LogisticsRegistrySummary,
    LogisticsRequest,
};
pub use miracles::{MiracleFlags, MiraclePhase, MiracleRecord, MiracleRegistry, MiracleRegistrySummary};
pub use resources::{ResourceFlags, ResourceNode, ResourceRegistry, ResourceRegistrySummary};
pub use spawners::{SpawnerFlags, SpawnerRecord, SpawnerRegistry, SpawnerRegistrySummary};
pub use storehouses::{
    StorehouseFlags, StorehouseRecord, StorehouseRegistry, StorehouseRegistrySummary,
};
pub use villagers::{
    VillagerFlags, VillagerJob, VillagerRecord, VillagerRegistry, VillagerRegistrySummary,
};

/// Install one registry: its entity, its capture hooks and its rebuild system.
pub fn add_domain<D: Domain>(app: &mut App) {
    install_registry::<D>(&mut app.world, None);
    app.world.resource_mut::<DomainCatalog>().register::<D>();
    app.add_systems(
        Update,
        rebuild_registry::<D>.in_set(TickPhase::RegistryRebuild),
    );
}

pub fn add_domain_registries(app: &mut App) {
    add_domain::<AbilityRegistry>(app);
    add_domain::<BandRegistry>(app);
    add_domain::<CreatureRegistry>(app);
    add_domain::<ConstructionRegistry>(app);
    add_domain::<SpawnerRegistry>(app);
    add_domain::<MiracleRegistry>(app);
    add_domain::<LogisticsRegistry>(app);
    add_domain::<VillagerRegistry>(app);
    add_domain::<ResourceRegistry>(app);
    add_domain::<StorehouseRegistry>(app);
}
