use std::collections::{BTreeMap, BTreeSet};

use sp_core::{ChoiceId, PropertyId, ScriptPlayError, StepId, Value};

use crate::predicate::{CompiledPredicate, PredicateCompiler};

/// Property recognized by a script; the label feeds required-data error
/// text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub id: PropertyId,
    pub label: String,
}

impl PropertySpec {
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: PropertyId::new(id),
            label: label.into(),
        }
    }
}

/// One transition rule: an optional predicate source and the target step.
/// An absent predicate is an unconditional transition.
#[derive(Debug, Clone, Default)]
pub struct ConditionSpec {
    pub predicate: Option<String>,
    pub target: StepId,
}

impl ConditionSpec {
    pub fn always(target: StepId) -> Self {
        Self {
            predicate: None,
            target,
        }
    }

    pub fn when(predicate: impl Into<String>, target: StepId) -> Self {
        Self {
            predicate: Some(predicate.into()),
            target,
        }
    }
}

/// Input for a prompt step.
#[derive(Debug, Clone, Default)]
pub struct SayStep {
    pub id: StepId,
    pub text: String,
    pub first: bool,
    pub default_values: BTreeMap<PropertyId, Value>,
    pub required_properties: Vec<PropertyId>,
    pub conditions: Vec<ConditionSpec>,
}

/// Input for a native-function step. `property_args` bind parameter names to
/// live store values, `value_args` to literals.
#[derive(Debug, Clone, Default)]
pub struct FunctionStep {
    pub id: StepId,
    pub function: String,
    pub property_args: BTreeMap<String, PropertyId>,
    pub value_args: BTreeMap<String, Value>,
    pub result_property: PropertyId,
    pub first: bool,
    pub default_values: BTreeMap<PropertyId, Value>,
    pub required_properties: Vec<PropertyId>,
    pub conditions: Vec<ConditionSpec>,
}

/// Input for a user-selectable choice on a step.
#[derive(Debug, Clone, Default)]
pub struct ChoiceSpec {
    pub id: ChoiceId,
    pub text: String,
    pub values: BTreeMap<PropertyId, Value>,
    pub required_properties: Vec<PropertyId>,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Say {
        text: String,
    },
    Function {
        function: String,
        property_args: BTreeMap<String, PropertyId>,
        value_args: BTreeMap<String, Value>,
        result_property: PropertyId,
    },
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub(crate) predicate: Option<CompiledPredicate>,
    pub(crate) target: StepId,
}

impl Condition {
    pub fn target(&self) -> StepId {
        self.target
    }

    pub fn predicate(&self) -> Option<&CompiledPredicate> {
        self.predicate.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct Choice {
    id: ChoiceId,
    text: String,
    values: BTreeMap<PropertyId, Value>,
    required_properties: Vec<PropertyId>,
}

impl Choice {
    pub fn id(&self) -> ChoiceId {
        self.id
    }

    pub fn text_template(&self) -> &str {
        &self.text
    }

    pub fn values(&self) -> &BTreeMap<PropertyId, Value> {
        &self.values
    }

    pub fn required_properties(&self) -> &[PropertyId] {
        &self.required_properties
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    id: StepId,
    kind: StepKind,
    first: bool,
    default_values: BTreeMap<PropertyId, Value>,
    required_properties: Vec<PropertyId>,
    conditions: Vec<Condition>,
    choices: Vec<Choice>,
}

impl Step {
    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn is_say(&self) -> bool {
        matches!(self.kind, StepKind::Say { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, StepKind::Function { .. })
    }

    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Terminal: no transition rules at all.
    pub fn is_final(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn text_template(&self) -> &str {
        match &self.kind {
            StepKind::Say { text } => text,
            StepKind::Function { .. } => "",
        }
    }

    pub fn default_values(&self) -> &BTreeMap<PropertyId, Value> {
        &self.default_values
    }

    pub fn required_properties(&self) -> &[PropertyId] {
        &self.required_properties
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn choice(&self, id: ChoiceId) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.id == id)
    }
}

/// Immutable-after-build step graph. Built once through
/// [`ScriptDefinitionBuilder`]; a single definition can back any number of
/// concurrent players.
#[derive(Debug)]
pub struct ScriptDefinition {
    properties: BTreeMap<PropertyId, String>,
    steps: BTreeMap<StepId, Step>,
    first_step: Option<StepId>,
}

impl ScriptDefinition {
    pub fn builder(properties: impl IntoIterator<Item = PropertySpec>) -> ScriptDefinitionBuilder {
        ScriptDefinitionBuilder {
            properties: properties
                .into_iter()
                .map(|spec| (spec.id, spec.label))
                .collect(),
            steps: BTreeMap::new(),
            first_step: None,
            compiler: PredicateCompiler::new(),
        }
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn contains_step(&self, id: StepId) -> bool {
        self.steps.contains_key(&id)
    }

    pub fn first_step(&self) -> Option<StepId> {
        self.first_step
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn property_ids(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.properties.keys().copied()
    }

    pub fn contains_property(&self, id: PropertyId) -> bool {
        self.properties.contains_key(&id)
    }

    pub fn property_label(&self, id: PropertyId) -> Option<&str> {
        self.properties.get(&id).map(String::as_str)
    }

    /// Say steps reachable from `id` in one transition, looking through
    /// Function steps. Visited-guarded, so cyclic definitions terminate.
    pub fn possible_next_steps(&self, id: StepId) -> Vec<StepId> {
        let mut out = Vec::new();
        let mut visited = BTreeSet::new();
        self.collect_possible_next(id, &mut visited, &mut out);
        out
    }

    fn collect_possible_next(
        &self,
        id: StepId,
        visited: &mut BTreeSet<StepId>,
        out: &mut Vec<StepId>,
    ) {
        let Some(step) = self.steps.get(&id) else {
            return;
        };
        for condition in &step.conditions {
            match self.steps.get(&condition.target) {
                Some(target) if target.is_function() => {
                    if visited.insert(condition.target) {
                        self.collect_possible_next(condition.target, visited, out);
                    }
                }
                Some(target) => {
                    if !out.contains(&target.id) {
                        out.push(target.id);
                    }
                }
                // Unresolved forward reference; nothing reachable through it.
                None => {}
            }
        }
    }
}

pub struct ScriptDefinitionBuilder {
    properties: BTreeMap<PropertyId, String>,
    steps: BTreeMap<StepId, Step>,
    first_step: Option<StepId>,
    compiler: PredicateCompiler,
}

impl ScriptDefinitionBuilder {
    /// Register a prompt step. The whole call fails atomically on any
    /// validation or predicate-compile error.
    pub fn add_say_step(&mut self, spec: SayStep) -> Result<(), ScriptPlayError> {
        if spec.text.trim().is_empty() {
            return Err(ScriptPlayError::new(
                "DEFINITION_STEP_MALFORMED",
                format!("Empty step text: {}", spec.id),
            ));
        }
        self.add_step(
            spec.id,
            StepKind::Say { text: spec.text },
            spec.first,
            spec.default_values,
            spec.required_properties,
            spec.conditions,
        )
    }

    /// Register a native-function step.
    pub fn add_function_step(&mut self, spec: FunctionStep) -> Result<(), ScriptPlayError> {
        if spec.function.trim().is_empty() {
            return Err(ScriptPlayError::new(
                "DEFINITION_STEP_MALFORMED",
                format!("Empty function name: {}", spec.id),
            ));
        }
        if !spec.result_property.is_valid() {
            return Err(ScriptPlayError::new(
                "DEFINITION_FUNCTION_RESULT_MISSING",
                format!("Function result property not defined: {}", spec.id),
            ));
        }
        self.check_property(spec.id, spec.result_property)?;
        for property in spec.property_args.values() {
            self.check_property(spec.id, *property)?;
        }

        self.add_step(
            spec.id,
            StepKind::Function {
                function: spec.function.trim().to_lowercase(),
                property_args: spec.property_args,
                value_args: spec.value_args,
                result_property: spec.result_property,
            },
            spec.first,
            spec.default_values,
            spec.required_properties,
            spec.conditions,
        )
    }

    /// Register a choice on an existing step.
    pub fn add_choice(&mut self, step_id: StepId, spec: ChoiceSpec) -> Result<(), ScriptPlayError> {
        let step = self.steps.get(&step_id).ok_or_else(|| {
            ScriptPlayError::new(
                "DEFINITION_STEP_NOT_FOUND",
                format!("Step not found: {}", step_id),
            )
        })?;

        if !spec.id.is_valid() {
            return Err(ScriptPlayError::new(
                "DEFINITION_STEP_ID_INVALID",
                format!("Incorrect choice id: step {}, choice {}", step_id, spec.id),
            ));
        }
        if step.choice(spec.id).is_some() {
            return Err(ScriptPlayError::new(
                "DEFINITION_CHOICE_DUPLICATED",
                format!("Choice id duplicated: step {}, choice {}", step_id, spec.id),
            ));
        }
        if spec.values.is_empty() {
            return Err(ScriptPlayError::new(
                "DEFINITION_CHOICE_EMPTY_VALUES",
                format!("Empty values: step {}, choice {}", step_id, spec.id),
            ));
        }
        if spec.text.trim().is_empty() && step.is_say() {
            return Err(ScriptPlayError::new(
                "DEFINITION_CHOICE_EMPTY_TEXT",
                format!("Choice text is empty: step {}, choice {}", step_id, spec.id),
            ));
        }
        for property in spec.values.keys().chain(spec.required_properties.iter()) {
            if !self.properties.contains_key(property) {
                return Err(ScriptPlayError::new(
                    "DEFINITION_PROPERTY_NOT_FOUND",
                    format!(
                        "Property not found: step {}, choice {}, property {}",
                        step_id, spec.id, property
                    ),
                ));
            }
        }

        let step = self.steps.get_mut(&step_id).expect("step checked above");
        step.choices.push(Choice {
            id: spec.id,
            text: spec.text,
            values: spec.values,
            required_properties: spec.required_properties,
        });
        Ok(())
    }

    pub fn finish(self) -> ScriptDefinition {
        ScriptDefinition {
            properties: self.properties,
            steps: self.steps,
            first_step: self.first_step,
        }
    }

    fn add_step(
        &mut self,
        id: StepId,
        kind: StepKind,
        first: bool,
        default_values: BTreeMap<PropertyId, Value>,
        required_properties: Vec<PropertyId>,
        conditions: Vec<ConditionSpec>,
    ) -> Result<(), ScriptPlayError> {
        if !id.is_valid() {
            return Err(ScriptPlayError::new(
                "DEFINITION_STEP_ID_INVALID",
                format!("Incorrect step id: {}", id),
            ));
        }
        if self.steps.contains_key(&id) {
            return Err(ScriptPlayError::new(
                "DEFINITION_STEP_DUPLICATED",
                format!("Step duplicated: {}", id),
            ));
        }
        if first && self.first_step.is_some() {
            return Err(ScriptPlayError::new(
                "DEFINITION_FIRST_STEP_DUPLICATED",
                format!("First step duplicated: {}", id),
            ));
        }
        for property in default_values.keys().chain(required_properties.iter()) {
            self.check_property(id, *property)?;
        }

        // Compile every predicate before touching the step table so the call
        // stays atomic. Targets may be forward references.
        let mut compiled = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let predicate = condition
                .predicate
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| self.compiler.compile(text, &self.properties))
                .transpose()?;
            compiled.push(Condition {
                predicate,
                target: condition.target,
            });
        }

        self.steps.insert(
            id,
            Step {
                id,
                kind,
                first,
                default_values,
                required_properties,
                conditions: compiled,
                choices: Vec::new(),
            },
        );
        if first {
            self.first_step = Some(id);
        }
        Ok(())
    }

    fn check_property(&self, step: StepId, property: PropertyId) -> Result<(), ScriptPlayError> {
        if !self.properties.contains_key(&property) {
            return Err(ScriptPlayError::new(
                "DEFINITION_PROPERTY_NOT_FOUND",
                format!("Property not found: step {}, property {}", step, property),
            ));
        }
        Ok(())
    }
}
