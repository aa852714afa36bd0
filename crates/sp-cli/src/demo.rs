use std::collections::BTreeMap;
use std::sync::Arc;

use sp_api::{create_player, PlayerOptions};
use sp_core::{ChoiceId, PropertyId, ScriptPlayError, StepId, Value};
use sp_runtime::{
    ChoiceSpec, ConditionSpec, FunctionStep, PropertySpec, SayStep, ScriptDefinition,
    ScriptPlayer,
};

const NAME: u32 = 10;
const CATEGORY: u32 = 11;
const SEVERITY: u32 = 12;
const PRIORITY: u32 = 13;
const SUMMARY: u32 = 14;

/// Support-ticket intake questionnaire: collects a name, a category choice,
/// a severity choice, computes a priority score through a function step and
/// branches on it.
pub fn demo_definition() -> Result<Arc<ScriptDefinition>, ScriptPlayError> {
    let mut builder = ScriptDefinition::builder(vec![
        PropertySpec::new(NAME, "Name"),
        PropertySpec::new(CATEGORY, "Category"),
        PropertySpec::new(SEVERITY, "Severity"),
        PropertySpec::new(PRIORITY, "Priority"),
        PropertySpec::new(SUMMARY, "Summary"),
    ]);

    builder.add_say_step(SayStep {
        id: StepId::new(1),
        text: "Welcome to support intake. Set your name to continue.".to_string(),
        first: true,
        required_properties: vec![PropertyId::new(NAME)],
        conditions: vec![ConditionSpec::when(
            format!("(n={}) n != \"\"", NAME),
            StepId::new(2),
        )],
        ..SayStep::default()
    })?;

    builder.add_say_step(SayStep {
        id: StepId::new(2),
        text: "Hello {{10}}. Pick a problem category.".to_string(),
        required_properties: vec![PropertyId::new(CATEGORY)],
        conditions: vec![ConditionSpec::when(
            format!("(c={}) c != \"\"", CATEGORY),
            StepId::new(3),
        )],
        ..SayStep::default()
    })?;
    builder.add_choice(
        StepId::new(2),
        ChoiceSpec {
            id: ChoiceId::new(1),
            text: "Hardware".to_string(),
            values: [(PropertyId::new(CATEGORY), Value::from("hardware"))].into(),
            ..ChoiceSpec::default()
        },
    )?;
    builder.add_choice(
        StepId::new(2),
        ChoiceSpec {
            id: ChoiceId::new(2),
            text: "Software".to_string(),
            values: [(PropertyId::new(CATEGORY), Value::from("software"))].into(),
            ..ChoiceSpec::default()
        },
    )?;
    builder.add_choice(
        StepId::new(2),
        ChoiceSpec {
            id: ChoiceId::new(3),
            text: "Other (fill the summary)".to_string(),
            values: [(PropertyId::new(CATEGORY), Value::from("other"))].into(),
            required_properties: vec![PropertyId::new(SUMMARY)],
        },
    )?;

    builder.add_say_step(SayStep {
        id: StepId::new(3),
        text: "How severe is the problem?".to_string(),
        required_properties: vec![PropertyId::new(SEVERITY)],
        conditions: vec![ConditionSpec::when(
            format!("(s={}) s > 0", SEVERITY),
            StepId::new(4),
        )],
        ..SayStep::default()
    })?;
    builder.add_choice(
        StepId::new(3),
        ChoiceSpec {
            id: ChoiceId::new(1),
            text: "Low".to_string(),
            values: [(PropertyId::new(SEVERITY), Value::Int(1))].into(),
            ..ChoiceSpec::default()
        },
    )?;
    builder.add_choice(
        StepId::new(3),
        ChoiceSpec {
            id: ChoiceId::new(2),
            text: "Medium".to_string(),
            values: [(PropertyId::new(SEVERITY), Value::Int(2))].into(),
            ..ChoiceSpec::default()
        },
    )?;
    builder.add_choice(
        StepId::new(3),
        ChoiceSpec {
            id: ChoiceId::new(3),
            text: "High".to_string(),
            values: [(PropertyId::new(SEVERITY), Value::Int(3))].into(),
            ..ChoiceSpec::default()
        },
    )?;

    builder.add_function_step(FunctionStep {
        id: StepId::new(4),
        function: "priority".to_string(),
        property_args: [
            ("category".to_string(), PropertyId::new(CATEGORY)),
            ("severity".to_string(), PropertyId::new(SEVERITY)),
        ]
        .into(),
        result_property: PropertyId::new(PRIORITY),
        conditions: vec![
            ConditionSpec::when(format!("(p={}) p >= 4", PRIORITY), StepId::new(5)),
            ConditionSpec::always(StepId::new(6)),
        ],
        ..FunctionStep::default()
    })?;

    builder.add_say_step(SayStep {
        id: StepId::new(5),
        text: "High priority ({{13}}). An engineer will contact {{10}} shortly.".to_string(),
        ..SayStep::default()
    })?;
    builder.add_say_step(SayStep {
        id: StepId::new(6),
        text: "Ticket queued with priority {{13}}. Thanks {{10}}!".to_string(),
        ..SayStep::default()
    })?;

    Ok(Arc::new(builder.finish()))
}

pub fn demo_step_tags() -> BTreeMap<StepId, String> {
    [
        (1, "ask-name"),
        (2, "category"),
        (3, "severity"),
        (4, "priority"),
        (5, "escalate"),
        (6, "queued"),
    ]
    .into_iter()
    .map(|(id, tag)| (StepId::new(id), tag.to_string()))
    .collect()
}

pub fn demo_property_tags() -> BTreeMap<PropertyId, String> {
    [
        (NAME, "name"),
        (CATEGORY, "category"),
        (SEVERITY, "severity"),
        (PRIORITY, "priority"),
        (SUMMARY, "summary"),
    ]
    .into_iter()
    .map(|(id, tag)| (PropertyId::new(id), tag.to_string()))
    .collect()
}

/// Hardware problems weigh double; everything else scores severity as-is.
fn priority(args: &BTreeMap<String, Value>) -> Result<Value, ScriptPlayError> {
    let severity = args
        .get("severity")
        .and_then(Value::as_int)
        .ok_or_else(|| ScriptPlayError::new("DEMO_BAD_ARG", "severity must be an integer"))?;
    let weight = match args.get("category").and_then(Value::as_str) {
        Some("hardware") => 2,
        _ => 1,
    };
    Ok(Value::Int(severity * weight))
}

pub fn demo_player() -> Result<ScriptPlayer, ScriptPlayError> {
    let mut options = PlayerOptions::new(demo_definition()?);
    options.step_tags = demo_step_tags();
    options.property_tags = demo_property_tags();
    options
        .functions
        .push(("priority".to_string(), Box::new(priority)));
    create_player(options)
}
