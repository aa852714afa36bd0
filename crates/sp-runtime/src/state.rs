use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value as JsonValue};
use sp_core::{ChoiceId, PropertyId, ScriptPlayError, StepId, Value};
use tracing::debug;

use crate::player::{PlayerEvent, ScriptPlayer};

/// Serializable projection of a player's position: current step, initialized
/// non-blank values, the ordered Say-step path from first to current, and
/// every recorded choice selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub current_step: Option<StepId>,
    pub values: BTreeMap<PropertyId, Value>,
    pub history: Vec<StepId>,
    pub choices: BTreeMap<StepId, ChoiceId>,
}

impl PlayerState {
    /// Render the state document. Ids serialize as decimal strings, or as
    /// stable tags when a non-empty tag map is supplied — decoupling saved
    /// state from internal renumbering. The four top-level field names are
    /// fixed for backward compatibility.
    pub fn to_json(
        &self,
        step_tags: &BTreeMap<StepId, String>,
        property_tags: &BTreeMap<PropertyId, String>,
    ) -> Result<String, ScriptPlayError> {
        let mut root = JsonMap::new();

        let step_id = match self.current_step {
            Some(id) => step_code(id, step_tags, "step_id")?,
            None => String::new(),
        };
        root.insert("step_id".to_string(), json!(step_id));

        let mut variables = Vec::new();
        for (property, value) in &self.values {
            variables.push(json!({
                "name": property_code(*property, property_tags)?,
                "value": serde_json::to_value(value).expect("value serialization is infallible"),
            }));
        }
        root.insert("variables".to_string(), JsonValue::Array(variables));

        let mut history = Vec::new();
        for (index, step) in self.history.iter().enumerate() {
            let prev = if index == 0 {
                String::new()
            } else {
                step_code(self.history[index - 1], step_tags, "history.prev_step_id")?
            };
            history.push(json!({
                "step_id": step_code(*step, step_tags, "history.step_id")?,
                "prev_step_id": prev,
            }));
        }
        root.insert("history".to_string(), JsonValue::Array(history));

        let mut choices = Vec::new();
        for (step, choice) in &self.choices {
            choices.push(json!({
                "step_id": step_code(*step, step_tags, "choices.step_id")?,
                "choice": choice.value(),
            }));
        }
        root.insert("choices".to_string(), JsonValue::Array(choices));

        serde_json::to_string_pretty(&JsonValue::Object(root))
            .map_err(|error| ScriptPlayError::new("STATE_PARSE", error.to_string()))
    }

    /// Parse a state document. An unknown step tag is a hard error naming
    /// the field; a variable whose property tag is unknown is silently
    /// skipped, tolerating schema drift in either direction.
    pub fn from_json(
        text: &str,
        step_tags: &BTreeMap<StepId, String>,
        property_tags: &BTreeMap<PropertyId, String>,
    ) -> Result<Self, ScriptPlayError> {
        let document: JsonValue = serde_json::from_str(text)
            .map_err(|error| ScriptPlayError::new("STATE_PARSE", error.to_string()))?;

        let step_id_text = document
            .get("step_id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| field_missing("step_id"))?;
        let current_step = if step_id_text.trim().is_empty() {
            None
        } else {
            Some(step_from_code(step_id_text, step_tags, "step_id")?)
        };

        let mut values = BTreeMap::new();
        for record in array_field(&document, "variables")? {
            let name = record
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| field_missing("variables.name"))?;
            let value = record
                .get("value")
                .ok_or_else(|| field_missing("variables.value"))?;

            let Some(property) = property_from_code(name, property_tags)? else {
                continue;
            };
            let value: Value = serde_json::from_value(value.clone()).map_err(|_| {
                ScriptPlayError::new(
                    "STATE_PARSE",
                    format!("Unsupported variable value: {}", name),
                )
            })?;

            if values.insert(property, value).is_some() {
                return Err(ScriptPlayError::new(
                    "STATE_DUPLICATE_VARIABLE",
                    format!("Duplicated variable: {}", name),
                ));
            }
        }

        // History records carry {step, prev} links; re-derive the order by
        // repeatedly extracting parentless records.
        let mut history_links: BTreeMap<StepId, Option<StepId>> = BTreeMap::new();
        for record in array_field(&document, "history")? {
            let step_text = record
                .get("step_id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| field_missing("history.step_id"))?;
            let prev_text = record
                .get("prev_step_id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| field_missing("history.prev_step_id"))?;

            let step = step_from_code(step_text, step_tags, "history.step_id")?;
            let prev = if prev_text.trim().is_empty() {
                None
            } else {
                Some(step_from_code(prev_text, step_tags, "history.prev_step_id")?)
            };

            if history_links.insert(step, prev).is_some() {
                return Err(ScriptPlayError::new(
                    "STATE_DUPLICATE_STEP",
                    format!("Duplicated step in history: {}", step_text),
                ));
            }
        }

        let mut history = Vec::with_capacity(history_links.len());
        while !history_links.is_empty() {
            let head = history_links
                .iter()
                .find(|(_, prev)| match prev {
                    Some(prev) => !history_links.contains_key(prev),
                    None => true,
                })
                .map(|(step, _)| *step);
            match head {
                Some(step) => {
                    history.push(step);
                    history_links.remove(&step);
                }
                None => {
                    return Err(ScriptPlayError::new(
                        "STATE_HISTORY_CYCLE",
                        "Cycle in history",
                    ));
                }
            }
        }

        let mut choices = BTreeMap::new();
        for record in array_field(&document, "choices")? {
            let step_text = record
                .get("step_id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| field_missing("choices.step_id"))?;
            let choice_value = record
                .get("choice")
                .ok_or_else(|| field_missing("choices.choice"))?;

            let step = step_from_code(step_text, step_tags, "choices.step_id")?;
            let choice = choice_id_from(choice_value)?;
            choices.insert(step, choice);
        }

        Ok(Self {
            current_step,
            values,
            history,
            choices,
        })
    }
}

impl ScriptPlayer {
    /// Capture the player's position for persistence.
    pub fn state(&self) -> PlayerState {
        let mut values = BTreeMap::new();
        for property in self.store.property_ids() {
            if let Some(value) = self.store.get(property) {
                if !value.is_blank() {
                    values.insert(property, value);
                }
            }
        }

        // The path is empty until the current step has a back-link; a freshly
        // started player records no history.
        let mut history = Vec::new();
        if let Some(current) = self.current {
            if self.came_from.contains_key(&current) {
                let mut seen = BTreeSet::new();
                let mut step = Some(current);
                while let Some(id) = step {
                    if !seen.insert(id) {
                        break;
                    }
                    history.push(id);
                    step = self.came_from.get(&id).copied();
                }
                history.reverse();
            }
        }

        PlayerState {
            current_step: self.current,
            values,
            history,
            choices: self.selected.clone(),
        }
    }

    /// Re-hydrate position, values, history and selections from a state.
    /// Validates against the *current* definition before touching anything,
    /// so a failed restore leaves the player unchanged.
    pub fn set_state(&mut self, state: &PlayerState) -> Result<(), ScriptPlayError> {
        self.restore_position(
            state.current_step,
            &state.history,
            &state.choices,
            Some(&state.values),
        )
    }

    /// Force the player to a position without touching property values. Can
    /// produce states a normal run would not reach.
    pub fn jump_to(
        &mut self,
        step: StepId,
        history: &[StepId],
        choices: &BTreeMap<StepId, ChoiceId>,
    ) -> Result<(), ScriptPlayError> {
        self.restore_position(Some(step), history, choices, None)
    }

    pub fn state_to_json(&self) -> Result<String, ScriptPlayError> {
        self.state().to_json(&self.step_tags, &self.property_tags)
    }

    pub fn set_state_from_json(&mut self, json: &str) -> Result<(), ScriptPlayError> {
        let state = PlayerState::from_json(json, &self.step_tags, &self.property_tags)?;
        self.set_state(&state)
    }

    fn restore_position(
        &mut self,
        target: Option<StepId>,
        history: &[StepId],
        choices: &BTreeMap<StepId, ChoiceId>,
        values: Option<&BTreeMap<PropertyId, Value>>,
    ) -> Result<(), ScriptPlayError> {
        let definition = Arc::clone(&self.definition);
        let target = target.or_else(|| definition.first_step());

        if let Some(id) = target {
            if definition.step(id).is_none() {
                return Err(ScriptPlayError::new(
                    "STATE_STEP_NOT_FOUND",
                    format!("Step not found: {}", id),
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for id in history {
            if definition.step(*id).is_none() {
                return Err(ScriptPlayError::new(
                    "STATE_STEP_NOT_FOUND",
                    format!("Step not found: {}", id),
                ));
            }
            if !seen.insert(*id) {
                return Err(ScriptPlayError::new(
                    "STATE_HISTORY_CYCLE",
                    format!("Step {} repeats in history", id),
                ));
            }
        }
        for pair in history.windows(2) {
            if !definition.possible_next_steps(pair[0]).contains(&pair[1]) {
                return Err(ScriptPlayError::new(
                    "STATE_STRUCTURE_MISMATCH",
                    "Script structure does not match",
                ));
            }
        }
        for (step_id, choice_id) in choices {
            let step = definition.step(*step_id).ok_or_else(|| {
                ScriptPlayError::new(
                    "STATE_STEP_NOT_FOUND",
                    format!("Step not found: {}", step_id),
                )
            })?;
            if step.choice(*choice_id).is_none() {
                return Err(ScriptPlayError::new(
                    "STATE_CHOICE_NOT_FOUND",
                    format!("Choice {} for step {} not found", choice_id, step_id),
                ));
            }
        }

        // Validation passed; apply.
        if let Some(values) = values {
            self.store.reset();
            for (property, value) in values {
                // Properties unknown to the current schema are skipped.
                if self.store.contains(*property) {
                    self.store.set(*property, value.clone())?;
                }
            }
        }

        let old = self.current;
        self.came_from.clear();
        self.selected.clear();
        for pair in history.windows(2) {
            self.came_from.insert(pair[1], pair[0]);
        }
        for (step_id, choice_id) in choices {
            self.selected.insert(*step_id, *choice_id);
            self.emit(PlayerEvent::ChoiceActivated {
                step: *step_id,
                choice: *choice_id,
            });
        }

        self.current = target;
        self.finished_notified = false;
        debug!(step = ?target, "position restored");
        if old != target {
            if let Some(old_id) = old {
                self.emit(PlayerEvent::StepLeft { step: old_id });
            }
            if let Some(new_id) = target {
                self.emit(PlayerEvent::StepEntered {
                    previous: old,
                    step: new_id,
                });
            }
        }
        Ok(())
    }
}

fn array_field<'d>(
    document: &'d JsonValue,
    field: &str,
) -> Result<&'d Vec<JsonValue>, ScriptPlayError> {
    document
        .get(field)
        .and_then(JsonValue::as_array)
        .ok_or_else(|| field_missing(field))
}

fn field_missing(field: &str) -> ScriptPlayError {
    ScriptPlayError::new("STATE_FIELD_MISSING", format!("Missing field: {}", field))
}

fn step_code(
    id: StepId,
    tags: &BTreeMap<StepId, String>,
    field: &str,
) -> Result<String, ScriptPlayError> {
    if tags.is_empty() {
        return Ok(id.to_string());
    }
    tags.get(&id)
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .ok_or_else(|| {
            ScriptPlayError::new(
                "STATE_UNKNOWN_TAG",
                format!("Step {} has no tag ({})", id, field),
            )
        })
}

fn step_from_code(
    code: &str,
    tags: &BTreeMap<StepId, String>,
    field: &str,
) -> Result<StepId, ScriptPlayError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(field_missing(field));
    }
    if !tags.is_empty() {
        return tags
            .iter()
            .find(|(_, tag)| tag.trim() == code)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                ScriptPlayError::new(
                    "STATE_UNKNOWN_TAG",
                    format!("Unknown step tag \"{}\" ({})", code, field),
                )
            });
    }
    code.parse::<u32>()
        .ok()
        .filter(|id| *id > 0)
        .map(StepId::new)
        .ok_or_else(|| {
            ScriptPlayError::new("STATE_PARSE", format!("Bad step id: {} ({})", code, field))
        })
}

fn property_code(
    id: PropertyId,
    tags: &BTreeMap<PropertyId, String>,
) -> Result<String, ScriptPlayError> {
    if tags.is_empty() {
        return Ok(id.to_string());
    }
    tags.get(&id)
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .ok_or_else(|| {
            ScriptPlayError::new(
                "STATE_UNKNOWN_TAG",
                format!("Property {} has no tag (variables.name)", id),
            )
        })
}

/// `Ok(None)` when a tag map is active and the tag is unknown — the record
/// is skipped rather than failing the load.
fn property_from_code(
    code: &str,
    tags: &BTreeMap<PropertyId, String>,
) -> Result<Option<PropertyId>, ScriptPlayError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(field_missing("variables.name"));
    }
    if !tags.is_empty() {
        return Ok(tags
            .iter()
            .find(|(_, tag)| tag.trim() == code)
            .map(|(id, _)| *id));
    }
    code.parse::<u32>()
        .ok()
        .filter(|id| *id > 0)
        .map(|id| Some(PropertyId::new(id)))
        .ok_or_else(|| {
            ScriptPlayError::new("STATE_PARSE", format!("Bad variable name: {}", code))
        })
}

fn choice_id_from(value: &JsonValue) -> Result<ChoiceId, ScriptPlayError> {
    let id = match value {
        JsonValue::Number(number) => number.as_u64(),
        JsonValue::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    id.filter(|id| *id > 0 && *id <= u64::from(u32::MAX))
        .map(|id| ChoiceId::new(id as u32))
        .ok_or_else(|| {
            ScriptPlayError::new("STATE_PARSE", format!("Bad choice id: {}", value))
        })
}
