use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use sp_core::{
    ChoiceId, MemoryPropertyStore, PropertyId, PropertyStore, ScriptPlayError, StepId, Value,
};

use crate::definition::{
    ChoiceSpec, ConditionSpec, FunctionStep, PropertySpec, SayStep, ScriptDefinition,
};
use crate::player::{PlayerEvent, ScriptPlayer};

pub(crate) fn player_for(definition: ScriptDefinition) -> ScriptPlayer {
    let definition = Arc::new(definition);
    let store = MemoryPropertyStore::new(definition.property_ids());
    ScriptPlayer::new(definition, Box::new(store))
}

pub(crate) fn record_events(player: &mut ScriptPlayer) -> Rc<RefCell<Vec<PlayerEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    player.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    events
}

/// The color-picker scenario: step 1 prompts, an unconditional transition
/// leads to step 2, which requires property 10 and offers red/blue choices.
pub(crate) fn color_script() -> ScriptDefinition {
    let mut builder = ScriptDefinition::builder(vec![PropertySpec::new(10, "Color")]);
    builder
        .add_say_step(SayStep {
            id: StepId::new(1),
            text: "Pick color".to_string(),
            first: true,
            conditions: vec![ConditionSpec::always(StepId::new(2))],
            ..SayStep::default()
        })
        .expect("step 1 should register");
    builder
        .add_say_step(SayStep {
            id: StepId::new(2),
            text: "You picked {{10}}".to_string(),
            required_properties: vec![PropertyId::new(10)],
            ..SayStep::default()
        })
        .expect("step 2 should register");
    builder
        .add_choice(
            StepId::new(2),
            ChoiceSpec {
                id: ChoiceId::new(1),
                text: "Red".to_string(),
                values: [(PropertyId::new(10), Value::from("red"))].into(),
                ..ChoiceSpec::default()
            },
        )
        .expect("red choice should register");
    builder
        .add_choice(
            StepId::new(2),
            ChoiceSpec {
                id: ChoiceId::new(2),
                text: "Blue".to_string(),
                values: [(PropertyId::new(10), Value::from("blue"))].into(),
                ..ChoiceSpec::default()
            },
        )
        .expect("blue choice should register");
    builder.finish()
}

/// Say 1 → Function 2 → Function 3 → Say 4, all unconditional. Function
/// steps double property 20.
pub(crate) fn chain_script() -> ScriptDefinition {
    let mut builder = ScriptDefinition::builder(vec![PropertySpec::new(20, "Score")]);
    builder
        .add_say_step(SayStep {
            id: StepId::new(1),
            text: "Start".to_string(),
            first: true,
            conditions: vec![ConditionSpec::always(StepId::new(2))],
            ..SayStep::default()
        })
        .expect("step 1 should register");
    builder
        .add_function_step(FunctionStep {
            id: StepId::new(2),
            function: "double".to_string(),
            property_args: [("input".to_string(), PropertyId::new(20))].into(),
            result_property: PropertyId::new(20),
            conditions: vec![ConditionSpec::always(StepId::new(3))],
            ..FunctionStep::default()
        })
        .expect("step 2 should register");
    builder
        .add_function_step(FunctionStep {
            id: StepId::new(3),
            function: "double".to_string(),
            property_args: [("input".to_string(), PropertyId::new(20))].into(),
            result_property: PropertyId::new(20),
            conditions: vec![ConditionSpec::always(StepId::new(4))],
            ..FunctionStep::default()
        })
        .expect("step 3 should register");
    builder
        .add_say_step(SayStep {
            id: StepId::new(4),
            text: "Score is {{20}}".to_string(),
            ..SayStep::default()
        })
        .expect("step 4 should register");
    builder.finish()
}

pub(crate) fn register_double(player: &mut ScriptPlayer) {
    player
        .register_function(
            "double",
            Box::new(|args| {
                let input = args
                    .get("input")
                    .and_then(Value::as_int)
                    .ok_or_else(|| ScriptPlayError::new("TEST_BAD_ARG", "input must be int"))?;
                Ok(Value::Int(input * 2))
            }),
        )
        .expect("double should register");
}

/// Store wrapper counting every write, for no-duplicate-write assertions.
pub(crate) struct CountingStore {
    inner: MemoryPropertyStore,
    writes: Rc<RefCell<usize>>,
}

impl CountingStore {
    pub(crate) fn new(
        recognized: impl IntoIterator<Item = PropertyId>,
    ) -> (Self, Rc<RefCell<usize>>) {
        let writes = Rc::new(RefCell::new(0));
        (
            Self {
                inner: MemoryPropertyStore::new(recognized),
                writes: Rc::clone(&writes),
            },
            writes,
        )
    }
}

impl PropertyStore for CountingStore {
    fn contains(&self, id: PropertyId) -> bool {
        self.inner.contains(id)
    }

    fn get(&self, id: PropertyId) -> Option<Value> {
        self.inner.get(id)
    }

    fn set(&mut self, id: PropertyId, value: Value) -> Result<(), ScriptPlayError> {
        *self.writes.borrow_mut() += 1;
        self.inner.set(id, value)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn property_ids(&self) -> Vec<PropertyId> {
        self.inner.property_ids()
    }
}
