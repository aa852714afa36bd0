use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rhai::Engine;
use sp_core::{ChoiceId, PropertyId, PropertyStore, ScriptPlayError, StepId, Value};
use tracing::debug;

use crate::definition::{ScriptDefinition, Step, StepKind};
use crate::registry::{FunctionRegistry, HostFunction};
use crate::template::render_template;

/// Notification delivered synchronously to subscribed observers, never
/// queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Started,
    Finished,
    StepLeft {
        step: StepId,
    },
    StepEntered {
        previous: Option<StepId>,
        step: StepId,
    },
    /// Advisory: the next step became reachable after a value write. Never
    /// transitions by itself.
    NextStepReady {
        step: StepId,
    },
    ChoiceActivated {
        step: StepId,
        choice: ChoiceId,
    },
}

type Observer = Box<dyn FnMut(&PlayerEvent)>;

/// Run-time cursor over a [`ScriptDefinition`]: current step, back-links,
/// per-step choice selections. All cursor state lives here, so one
/// definition can back any number of players.
pub struct ScriptPlayer {
    pub(crate) definition: Arc<ScriptDefinition>,
    pub(crate) store: Box<dyn PropertyStore>,
    pub(crate) functions: FunctionRegistry,
    pub(crate) evaluator: Engine,
    pub(crate) open_mark: String,
    pub(crate) close_mark: String,
    pub(crate) step_tags: BTreeMap<StepId, String>,
    pub(crate) property_tags: BTreeMap<PropertyId, String>,
    pub(crate) current: Option<StepId>,
    pub(crate) came_from: BTreeMap<StepId, StepId>,
    pub(crate) selected: BTreeMap<StepId, ChoiceId>,
    pub(crate) observers: Vec<Observer>,
    pub(crate) finished_notified: bool,
}

impl ScriptPlayer {
    pub fn new(definition: Arc<ScriptDefinition>, store: Box<dyn PropertyStore>) -> Self {
        Self {
            definition,
            store,
            functions: FunctionRegistry::new(),
            evaluator: crate::predicate::evaluator(),
            open_mark: "{{".to_string(),
            close_mark: "}}".to_string(),
            step_tags: BTreeMap::new(),
            property_tags: BTreeMap::new(),
            current: None,
            came_from: BTreeMap::new(),
            selected: BTreeMap::new(),
            observers: Vec::new(),
            finished_notified: false,
        }
    }

    pub fn definition(&self) -> &ScriptDefinition {
        &self.definition
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&PlayerEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn register_function(
        &mut self,
        name: &str,
        function: HostFunction,
    ) -> Result<(), ScriptPlayError> {
        self.functions.register(name, function)
    }

    pub fn is_function_registered(&self, name: &str) -> bool {
        self.functions.is_registered(name)
    }

    pub fn open_mark(&self) -> &str {
        &self.open_mark
    }

    pub fn close_mark(&self) -> &str {
        &self.close_mark
    }

    pub fn set_marks(&mut self, open: &str, close: &str) -> Result<(), ScriptPlayError> {
        if open.is_empty() || close.is_empty() {
            return Err(ScriptPlayError::new(
                "PLAYER_MARKS_EMPTY",
                "Template marks must not be empty",
            ));
        }
        self.open_mark = open.to_string();
        self.close_mark = close.to_string();
        Ok(())
    }

    pub fn set_step_tags(
        &mut self,
        tags: BTreeMap<StepId, String>,
    ) -> Result<(), ScriptPlayError> {
        for (id, tag) in &tags {
            if !id.is_valid() || tag.trim().is_empty() {
                return Err(ScriptPlayError::new(
                    "PLAYER_TAG_INVALID",
                    format!("Bad step tag: {} -> \"{}\"", id, tag),
                ));
            }
        }
        self.step_tags = tags;
        Ok(())
    }

    pub fn set_property_tags(
        &mut self,
        tags: BTreeMap<PropertyId, String>,
    ) -> Result<(), ScriptPlayError> {
        for (id, tag) in &tags {
            if !id.is_valid() || tag.trim().is_empty() {
                return Err(ScriptPlayError::new(
                    "PLAYER_TAG_INVALID",
                    format!("Bad property tag: {} -> \"{}\"", id, tag),
                ));
            }
        }
        self.property_tags = tags;
        Ok(())
    }

    pub fn step_tag(&self, id: StepId) -> Option<&str> {
        self.step_tags.get(&id).map(String::as_str)
    }

    pub fn step_by_tag(&self, tag: &str) -> Option<StepId> {
        self.step_tags
            .iter()
            .find(|(_, value)| value.as_str() == tag)
            .map(|(id, _)| *id)
    }

    pub fn property_tag(&self, id: PropertyId) -> Option<&str> {
        self.property_tags.get(&id).map(String::as_str)
    }

    pub fn property_by_tag(&self, tag: &str) -> Option<PropertyId> {
        self.property_tags
            .iter()
            .find(|(_, value)| value.as_str() == tag)
            .map(|(id, _)| *id)
    }

    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_step(&self) -> Option<StepId> {
        self.current
    }

    pub fn first_step(&self) -> Option<StepId> {
        self.definition.first_step()
    }

    /// The Say step the current step was entered from.
    pub fn previous_step(&self) -> Option<StepId> {
        self.came_from.get(&self.current?).copied()
    }

    pub fn is_first_step(&self) -> bool {
        self.current.is_some() && self.previous_step().is_none()
    }

    /// A step with no transition rules is terminal.
    pub fn is_final_step(&self) -> bool {
        match self.current.and_then(|id| self.definition.step(id)) {
            Some(step) => step.is_final(),
            None => true,
        }
    }

    pub fn selected_choice(&self, step: StepId) -> Option<ChoiceId> {
        self.selected.get(&step).copied()
    }

    pub fn current_choice(&self) -> Option<ChoiceId> {
        self.selected_choice(self.current?)
    }

    /// Property value; `None` while unknown or uninitialized.
    pub fn value(&self, property: PropertyId) -> Option<Value> {
        self.read_value(property)
    }

    pub fn value_by_tag(&self, tag: &str) -> Option<Value> {
        self.read_value(self.property_by_tag(tag)?)
    }

    /// NotStarted → Running at the designated first step.
    pub fn start(&mut self) -> Result<(), ScriptPlayError> {
        if self.current.is_some() {
            return Err(ScriptPlayError::new(
                "PLAYER_ALREADY_STARTED",
                "Player already started",
            ));
        }
        let first = self.definition.first_step().ok_or_else(|| {
            ScriptPlayError::new("PLAYER_FIRST_STEP_MISSING", "First step not defined")
        })?;

        self.current = Some(first);
        self.finished_notified = false;
        debug!(step = first.value(), "script started");
        self.emit(PlayerEvent::Started);
        self.emit(PlayerEvent::StepEntered {
            previous: None,
            step: first,
        });
        Ok(())
    }

    /// Evaluate the current step's conditions and move to the next Say step,
    /// chaining through Function steps. Function-result writes earlier in
    /// the chain stay applied even when a later link fails; the current step
    /// only moves on full success. Callers needing atomicity snapshot first.
    pub fn advance(&mut self) -> Result<(), ScriptPlayError> {
        let Some(current_id) = self.current else {
            return self.start();
        };
        let definition = Arc::clone(&self.definition);
        let current = definition.step(current_id).ok_or_else(|| {
            ScriptPlayError::new(
                "PLAYER_STEP_NOT_FOUND",
                format!("Step not found: {}", current_id),
            )
        })?;

        let Some((first_target, by_predicate)) = self.match_condition(current, None)? else {
            if current.is_final() {
                let missing = self.missing_required();
                if !missing.is_empty() {
                    return Err(self.required_data_error(missing));
                }
                return Err(self.finish());
            }
            return Err(self.required_data_error(self.missing_required()));
        };
        if by_predicate {
            let missing = self.missing_required();
            if !missing.is_empty() {
                return Err(self.required_data_error(missing));
            }
        }

        // Chain through Function steps until a Say step is reached.
        let mut visited: BTreeSet<StepId> = BTreeSet::new();
        let mut next_id = first_target;
        loop {
            let step = definition.step(next_id).ok_or_else(|| {
                ScriptPlayError::new(
                    "PLAYER_STEP_NOT_FOUND",
                    format!("Step not found: {}", next_id),
                )
            })?;

            for (property, value) in step.default_values() {
                self.store.set(*property, value.clone())?;
            }
            if step.is_say() {
                break;
            }

            if !visited.insert(next_id) {
                return Err(ScriptPlayError::new(
                    "PLAYER_FUNCTION_CHAIN_LOOP",
                    format!("Function step chain revisited step {}", next_id),
                ));
            }

            let (result_property, result) = self.call_step_function(step, None)?;
            self.store.set(result_property, result)?;

            match self.match_condition(step, None)? {
                Some((target, _)) => next_id = target,
                None if step.is_final() => return Err(self.finish()),
                None => return Err(self.required_data_error(self.missing_required())),
            }
        }

        self.came_from.insert(next_id, current_id);
        self.current = Some(next_id);
        self.finished_notified = false;
        debug!(from = current_id.value(), to = next_id.value(), "step transition");
        self.emit(PlayerEvent::StepLeft { step: current_id });
        self.emit(PlayerEvent::StepEntered {
            previous: Some(current_id),
            step: next_id,
        });
        Ok(())
    }

    /// Move to the step the current one was entered from, clearing the used
    /// link; re-advancing derives a fresh path instead of replaying the old
    /// one.
    pub fn back(&mut self) -> Result<(), ScriptPlayError> {
        let current = self.current.ok_or_else(|| {
            ScriptPlayError::new("PLAYER_NOT_STARTED", "Player not started")
        })?;
        let previous = self.came_from.get(&current).copied().ok_or_else(|| {
            ScriptPlayError::new("PLAYER_NO_PREVIOUS_STEP", "No previous step")
        })?;

        self.came_from.remove(&current);
        self.current = Some(previous);
        self.finished_notified = false;
        debug!(from = current.value(), to = previous.value(), "step back");
        self.emit(PlayerEvent::StepLeft { step: current });
        self.emit(PlayerEvent::StepEntered {
            previous: Some(current),
            step: previous,
        });
        Ok(())
    }

    /// Select a choice of the current step, applying its values.
    /// Re-selecting the active choice is a no-op with zero writes.
    pub fn select_choice(
        &mut self,
        step: StepId,
        choice_id: ChoiceId,
    ) -> Result<(), ScriptPlayError> {
        let current = self.current.ok_or_else(|| {
            ScriptPlayError::new("PLAYER_NOT_STARTED", "Player not started")
        })?;
        if step != current {
            return Err(ScriptPlayError::new(
                "PLAYER_STEP_NOT_CURRENT",
                format!("Choice must target the current step: {}", current),
            ));
        }
        let definition = Arc::clone(&self.definition);
        let step = definition.step(current).ok_or_else(|| {
            ScriptPlayError::new(
                "PLAYER_STEP_NOT_FOUND",
                format!("Step not found: {}", current),
            )
        })?;
        let choice = step.choice(choice_id).ok_or_else(|| {
            ScriptPlayError::new(
                "PLAYER_CHOICE_NOT_FOUND",
                format!("Choice not found: step {}, choice {}", current, choice_id),
            )
        })?;

        if self.selected.get(&current) == Some(&choice_id) {
            return Ok(());
        }

        let mut first_error = None;
        for (property, value) in choice.values() {
            if let Err(error) = self.set_value(*property, value.clone()) {
                first_error.get_or_insert(error);
            }
        }

        self.selected.insert(current, choice_id);
        self.emit(PlayerEvent::ChoiceActivated {
            step: current,
            choice: choice_id,
        });
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Write a property value. Emits an advisory `NextStepReady` when the
    /// write changed which next step is reachable; never transitions.
    pub fn set_value(&mut self, property: PropertyId, value: Value) -> Result<(), ScriptPlayError> {
        if !self.store.contains(property) {
            return Err(ScriptPlayError::new(
                "PLAYER_PROPERTY_NOT_FOUND",
                format!("Property not found: {}", property),
            ));
        }

        let before = self.probe_next();
        self.store.set(property, value)?;
        let after = self.probe_next();
        if let Some(target) = after {
            if before != after {
                self.emit(PlayerEvent::NextStepReady { step: target });
            }
        }
        Ok(())
    }

    pub fn set_value_by_tag(&mut self, tag: &str, value: Value) -> Result<(), ScriptPlayError> {
        let property = self.property_by_tag(tag).ok_or_else(|| {
            ScriptPlayError::new(
                "PLAYER_PROPERTY_NOT_FOUND",
                format!("Property not found: {}", tag),
            )
        })?;
        self.set_value(property, value)
    }

    /// The Say step `advance()` would currently commit to, if any. Dry-run:
    /// function results land in an overlay, the store is untouched.
    pub fn next_step(&self) -> Option<StepId> {
        self.probe_next()
    }

    /// Rendered text of a step's template against current values.
    pub fn step_text(&self, step: StepId, rich: bool) -> Result<String, ScriptPlayError> {
        let step = self.definition.step(step).ok_or_else(|| {
            ScriptPlayError::new("PLAYER_STEP_NOT_FOUND", format!("Step not found: {}", step))
        })?;
        self.render(step.text_template(), rich)
    }

    /// Rendered text of a choice's template against current values.
    pub fn choice_text(
        &self,
        step: StepId,
        choice: ChoiceId,
        rich: bool,
    ) -> Result<String, ScriptPlayError> {
        let step_ref = self.definition.step(step).ok_or_else(|| {
            ScriptPlayError::new("PLAYER_STEP_NOT_FOUND", format!("Step not found: {}", step))
        })?;
        let choice = step_ref.choice(choice).ok_or_else(|| {
            ScriptPlayError::new(
                "PLAYER_CHOICE_NOT_FOUND",
                format!("Choice not found: step {}, choice {}", step, choice),
            )
        })?;
        self.render(choice.text_template(), rich)
    }

    pub(crate) fn emit(&mut self, event: PlayerEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    pub(crate) fn read_value(&self, property: PropertyId) -> Option<Value> {
        if !self.store.contains(property) {
            return None;
        }
        self.store.get(property)
    }

    fn render(&self, template: &str, rich: bool) -> Result<String, ScriptPlayError> {
        let known: BTreeSet<PropertyId> = self.definition.property_ids().collect();
        let mut values = BTreeMap::new();
        for id in self.store.property_ids() {
            if let Some(value) = self.store.get(id) {
                values.insert(id, value);
            }
        }
        render_template(
            template,
            &self.open_mark,
            &self.close_mark,
            &known,
            &values,
            rich,
        )
    }

    /// First condition of `step` that holds: unconditional, or predicate
    /// true over fully-initialized bindings. A predicate whose bound
    /// property is unset/blank does not match.
    fn match_condition(
        &self,
        step: &Step,
        overlay: Option<&BTreeMap<PropertyId, Value>>,
    ) -> Result<Option<(StepId, bool)>, ScriptPlayError> {
        for condition in step.conditions() {
            let Some(predicate) = condition.predicate() else {
                return Ok(Some((condition.target(), false)));
            };

            let mut args = Vec::with_capacity(predicate.params().len());
            for (_, property) in predicate.params() {
                let value = overlay
                    .and_then(|overlay| overlay.get(property).cloned())
                    .or_else(|| self.read_value(*property));
                match value {
                    Some(value) if !value.is_blank() => args.push(value),
                    _ => {
                        args.clear();
                        break;
                    }
                }
            }
            if args.len() != predicate.params().len() {
                continue;
            }

            if predicate.evaluate(&self.evaluator, &args)? {
                return Ok(Some((condition.target(), true)));
            }
        }
        Ok(None)
    }

    /// Resolve a Function step's arguments and invoke its host function.
    fn call_step_function(
        &self,
        step: &Step,
        overlay: Option<&BTreeMap<PropertyId, Value>>,
    ) -> Result<(PropertyId, Value), ScriptPlayError> {
        let StepKind::Function {
            function,
            property_args,
            value_args,
            result_property,
        } = step.kind()
        else {
            return Err(ScriptPlayError::new(
                "PLAYER_STEP_NOT_FOUND",
                format!("Step {} is not a function step", step.id()),
            ));
        };

        let mut args: BTreeMap<String, Value> = value_args.clone();
        for (name, property) in property_args {
            let value = overlay
                .and_then(|overlay| overlay.get(property).cloned())
                .or_else(|| self.read_value(*property))
                .unwrap_or(Value::Null);
            args.insert(name.clone(), value);
        }

        let result = self.functions.call(function, &args)?;
        Ok((*result_property, result))
    }

    /// Dry-run the transition chain; errors and dead ends read as "nothing
    /// reachable".
    fn probe_next(&self) -> Option<StepId> {
        let Some(current_id) = self.current else {
            return self.definition.first_step();
        };
        let step = self.definition.step(current_id)?;

        let mut overlay: BTreeMap<PropertyId, Value> = BTreeMap::new();
        let (mut next_id, by_predicate) = self.match_condition(step, Some(&overlay)).ok()??;
        if by_predicate && !self.missing_required().is_empty() {
            return None;
        }

        let mut visited: BTreeSet<StepId> = BTreeSet::new();
        loop {
            let step = self.definition.step(next_id)?;
            for (property, value) in step.default_values() {
                overlay.insert(*property, value.clone());
            }
            if step.is_say() {
                return Some(next_id);
            }
            if !visited.insert(next_id) {
                return None;
            }

            let (result_property, result) = self.call_step_function(step, Some(&overlay)).ok()?;
            overlay.insert(result_property, result);

            let (target, _) = self.match_condition(step, Some(&overlay)).ok()??;
            next_id = target;
        }
    }

    /// Unset/blank properties in the union of the current step's and its
    /// selected choice's required sets, choice first (display order).
    fn missing_required(&self) -> Vec<PropertyId> {
        let Some(step) = self.current.and_then(|id| self.definition.step(id)) else {
            return Vec::new();
        };

        let mut checked: Vec<PropertyId> = Vec::new();
        if let Some(choice) = self
            .current
            .and_then(|id| self.selected.get(&id))
            .and_then(|choice| step.choice(*choice))
        {
            checked.extend(choice.required_properties().iter().copied());
        }
        for property in step.required_properties() {
            if !checked.contains(property) {
                checked.push(*property);
            }
        }

        checked
            .into_iter()
            .filter(|property| {
                self.read_value(*property)
                    .map_or(true, |value| value.is_blank())
            })
            .collect()
    }

    fn required_data_error(&self, missing: Vec<PropertyId>) -> ScriptPlayError {
        let names: Vec<String> = missing
            .iter()
            .map(|property| {
                self.definition
                    .property_label(*property)
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string())
            })
            .collect();
        ScriptPlayError::with_details(
            "PLAYER_REQUIRED_DATA_MISSING",
            format!("Required data not entered: {}", names.join(", ")),
            names,
        )
    }

    /// Terminal advance: emit `Finished` once per stay on this step and
    /// report through the error channel.
    fn finish(&mut self) -> ScriptPlayError {
        if !self.finished_notified {
            self.finished_notified = true;
            self.emit(PlayerEvent::Finished);
        }
        ScriptPlayError::new("PLAYER_SCRIPT_FINISHED", "Final step reached")
    }
}
