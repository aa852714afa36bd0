use std::collections::BTreeMap;
use std::sync::Arc;

use sp_core::{MemoryPropertyStore, PropertyId, PropertyStore, ScriptPlayError, StepId};
use sp_runtime::{HostFunction, ScriptDefinition, ScriptPlayer};

/// Everything needed to assemble a player over a shared definition. When no
/// store is supplied an in-memory one is created over the definition's
/// property schema.
pub struct PlayerOptions {
    pub definition: Arc<ScriptDefinition>,
    pub store: Option<Box<dyn PropertyStore>>,
    pub step_tags: BTreeMap<StepId, String>,
    pub property_tags: BTreeMap<PropertyId, String>,
    pub functions: Vec<(String, HostFunction)>,
}

impl PlayerOptions {
    pub fn new(definition: Arc<ScriptDefinition>) -> Self {
        Self {
            definition,
            store: None,
            step_tags: BTreeMap::new(),
            property_tags: BTreeMap::new(),
            functions: Vec::new(),
        }
    }
}

/// Build a player. The caller starts it (or restores a state) afterwards.
pub fn create_player(options: PlayerOptions) -> Result<ScriptPlayer, ScriptPlayError> {
    let store = options.store.unwrap_or_else(|| {
        Box::new(MemoryPropertyStore::new(options.definition.property_ids()))
    });

    let mut player = ScriptPlayer::new(options.definition, store);
    if !options.step_tags.is_empty() {
        player.set_step_tags(options.step_tags)?;
    }
    if !options.property_tags.is_empty() {
        player.set_property_tags(options.property_tags)?;
    }
    for (name, function) in options.functions {
        player.register_function(&name, function)?;
    }
    Ok(player)
}

/// Build a player and re-hydrate it from a serialized state document.
pub fn resume_player(
    options: PlayerOptions,
    state_json: &str,
) -> Result<ScriptPlayer, ScriptPlayError> {
    let mut player = create_player(options)?;
    player.set_state_from_json(state_json)?;
    Ok(player)
}
