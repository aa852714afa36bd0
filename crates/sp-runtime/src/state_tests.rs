use std::collections::BTreeMap;
use std::sync::Arc;

use sp_core::{ChoiceId, MemoryPropertyStore, PropertyId, StepId, Value};

use crate::definition::{
    ChoiceSpec, ConditionSpec, PropertySpec, SayStep, ScriptDefinition,
};
use crate::player::{PlayerEvent, ScriptPlayer};
use crate::state::PlayerState;
use crate::test_support::*;

fn no_step_tags() -> BTreeMap<StepId, String> {
    BTreeMap::new()
}

fn no_property_tags() -> BTreeMap<PropertyId, String> {
    BTreeMap::new()
}

#[test]
fn freshly_started_player_has_empty_history() {
    let mut player = player_for(color_script());
    player.start().expect("start should pass");

    let state = player.state();
    assert_eq!(state.current_step, Some(StepId::new(1)));
    assert!(state.history.is_empty());
    assert!(state.values.is_empty());
    assert!(state.choices.is_empty());
}

#[test]
fn state_roundtrip_reproduces_position() {
    let mut player = player_for(color_script());
    player.start().expect("start should pass");
    player.advance().expect("advance should pass");
    player
        .select_choice(StepId::new(2), ChoiceId::new(1))
        .expect("choice should apply");

    let state = player.state();
    assert_eq!(state.current_step, Some(StepId::new(2)));
    assert_eq!(state.history, vec![StepId::new(1), StepId::new(2)]);
    assert_eq!(
        state.values.get(&PropertyId::new(10)),
        Some(&Value::from("red"))
    );
    assert_eq!(
        state.choices.get(&StepId::new(2)),
        Some(&ChoiceId::new(1))
    );

    let mut restored = player_for(color_script());
    restored.set_state(&state).expect("restore should pass");
    assert_eq!(restored.state(), state);
    assert_eq!(restored.current_step(), Some(StepId::new(2)));
    assert_eq!(restored.previous_step(), Some(StepId::new(1)));
    assert_eq!(
        restored.value(PropertyId::new(10)),
        Some(Value::from("red"))
    );

    // The restored player behaves like the original: back works, and the
    // terminal advance finishes.
    restored.back().expect("back should pass");
    assert_eq!(restored.current_step(), Some(StepId::new(1)));
}

#[test]
fn json_roundtrip_with_raw_ids() {
    let mut player = player_for(color_script());
    player.start().expect("start should pass");
    player.advance().expect("advance should pass");
    player
        .select_choice(StepId::new(2), ChoiceId::new(2))
        .expect("choice should apply");

    let json = player.state_to_json().expect("serialize should pass");
    let document: serde_json::Value =
        serde_json::from_str(&json).expect("document should parse");
    assert_eq!(document["step_id"], "2");
    assert_eq!(document["variables"][0]["name"], "10");
    assert_eq!(document["variables"][0]["value"], "blue");
    assert_eq!(document["history"][0]["step_id"], "1");
    assert_eq!(document["history"][0]["prev_step_id"], "");
    assert_eq!(document["history"][1]["step_id"], "2");
    assert_eq!(document["history"][1]["prev_step_id"], "1");
    assert_eq!(document["choices"][0]["step_id"], "2");
    assert_eq!(document["choices"][0]["choice"], 2);

    let mut restored = player_for(color_script());
    restored
        .set_state_from_json(&json)
        .expect("restore should pass");
    assert_eq!(restored.state(), player.state());
}

#[test]
fn restore_emits_transition_only_when_position_changes() {
    let mut player = player_for(color_script());
    player.start().expect("start should pass");
    player.advance().expect("advance should pass");
    player
        .select_choice(StepId::new(2), ChoiceId::new(1))
        .expect("choice should apply");
    let state = player.state();

    let mut restored = player_for(color_script());
    restored.start().expect("start should pass");
    let events = record_events(&mut restored);
    restored.set_state(&state).expect("restore should pass");
    assert_eq!(
        events.borrow().as_slice(),
        &[
            PlayerEvent::ChoiceActivated {
                step: StepId::new(2),
                choice: ChoiceId::new(1),
            },
            PlayerEvent::StepLeft {
                step: StepId::new(1)
            },
            PlayerEvent::StepEntered {
                previous: Some(StepId::new(1)),
                step: StepId::new(2),
            },
        ]
    );

    // Restoring the same state again moves nothing.
    let events = record_events(&mut restored);
    restored.set_state(&state).expect("restore should pass");
    assert_eq!(
        events.borrow().as_slice(),
        &[PlayerEvent::ChoiceActivated {
            step: StepId::new(2),
            choice: ChoiceId::new(1),
        }]
    );
}

#[test]
fn tagged_snapshot_survives_property_renumbering() {
    // Save with property 10 tagged "color"...
    let mut player = player_for(color_script());
    player
        .set_step_tags(
            [
                (StepId::new(1), "intro".to_string()),
                (StepId::new(2), "confirm".to_string()),
            ]
            .into(),
        )
        .expect("step tags should apply");
    player
        .set_property_tags([(PropertyId::new(10), "color".to_string())].into())
        .expect("property tags should apply");
    player.start().expect("start should pass");
    player.advance().expect("advance should pass");
    player
        .select_choice(StepId::new(2), ChoiceId::new(1))
        .expect("choice should apply");

    let json = player.state_to_json().expect("serialize should pass");
    let document: serde_json::Value =
        serde_json::from_str(&json).expect("document should parse");
    assert_eq!(document["step_id"], "confirm");
    assert_eq!(document["variables"][0]["name"], "color");
    assert_eq!(document["variables"][0]["value"], "red");

    // ...and load against a definition where the property moved to id 11
    // but kept its tag.
    let mut builder = ScriptDefinition::builder(vec![PropertySpec::new(11, "Color")]);
    builder
        .add_say_step(SayStep {
            id: StepId::new(1),
            text: "Pick color".to_string(),
            first: true,
            conditions: vec![ConditionSpec::always(StepId::new(2))],
            ..SayStep::default()
        })
        .expect("step should register");
    builder
        .add_say_step(SayStep {
            id: StepId::new(2),
            text: "You picked {{11}}".to_string(),
            required_properties: vec![PropertyId::new(11)],
            ..SayStep::default()
        })
        .expect("step should register");
    builder
        .add_choice(
            StepId::new(2),
            ChoiceSpec {
                id: ChoiceId::new(1),
                text: "Red".to_string(),
                values: [(PropertyId::new(11), Value::from("red"))].into(),
                ..ChoiceSpec::default()
            },
        )
        .expect("choice should register");

    let mut renumbered = player_for(builder.finish());
    renumbered
        .set_step_tags(
            [
                (StepId::new(1), "intro".to_string()),
                (StepId::new(2), "confirm".to_string()),
            ]
            .into(),
        )
        .expect("step tags should apply");
    renumbered
        .set_property_tags([(PropertyId::new(11), "color".to_string())].into())
        .expect("property tags should apply");

    renumbered
        .set_state_from_json(&json)
        .expect("restore should pass");
    assert_eq!(
        renumbered.value(PropertyId::new(11)),
        Some(Value::from("red"))
    );
    assert_eq!(renumbered.current_step(), Some(StepId::new(2)));
}

#[test]
fn serializing_untagged_step_fails_when_tag_map_is_active() {
    let mut player = player_for(color_script());
    player
        .set_step_tags([(StepId::new(1), "intro".to_string())].into())
        .expect("step tags should apply");
    player.start().expect("start should pass");
    player.advance().expect("advance should pass");

    let error = player
        .state_to_json()
        .expect_err("step 2 has no tag, serialization should fail");
    assert_eq!(error.code, "STATE_UNKNOWN_TAG");
}

#[test]
fn unknown_step_tag_on_load_is_a_hard_error() {
    let json = r#"{
        "step_id": "missing",
        "variables": [],
        "history": [],
        "choices": []
    }"#;
    let tags: BTreeMap<StepId, String> = [(StepId::new(1), "intro".to_string())].into();
    let error = PlayerState::from_json(json, &tags, &no_property_tags())
        .expect_err("unknown tag should fail");
    assert_eq!(error.code, "STATE_UNKNOWN_TAG");
    assert!(error.message.contains("step_id"));
}

#[test]
fn unknown_property_tag_on_load_is_skipped() {
    let json = r#"{
        "step_id": "",
        "variables": [
            {"name": "color", "value": "red"},
            {"name": "retired", "value": "x"}
        ],
        "history": [],
        "choices": []
    }"#;
    let tags: BTreeMap<PropertyId, String> =
        [(PropertyId::new(10), "color".to_string())].into();
    let state = PlayerState::from_json(json, &no_step_tags(), &tags)
        .expect("unknown property tag should be tolerated");
    assert_eq!(state.values.len(), 1);
    assert_eq!(
        state.values.get(&PropertyId::new(10)),
        Some(&Value::from("red"))
    );
}

#[test]
fn duplicated_variable_fails_the_load() {
    let json = r#"{
        "step_id": "",
        "variables": [
            {"name": "10", "value": "red"},
            {"name": "10", "value": "blue"}
        ],
        "history": [],
        "choices": []
    }"#;
    let error = PlayerState::from_json(json, &no_step_tags(), &no_property_tags())
        .expect_err("duplicate variable should fail");
    assert_eq!(error.code, "STATE_DUPLICATE_VARIABLE");
}

#[test]
fn history_order_is_rebuilt_from_links() {
    // Records deliberately out of order.
    let json = r#"{
        "step_id": "3",
        "variables": [],
        "history": [
            {"step_id": "3", "prev_step_id": "2"},
            {"step_id": "1", "prev_step_id": ""},
            {"step_id": "2", "prev_step_id": "1"}
        ],
        "choices": []
    }"#;
    let state = PlayerState::from_json(json, &no_step_tags(), &no_property_tags())
        .expect("load should pass");
    assert_eq!(
        state.history,
        vec![StepId::new(1), StepId::new(2), StepId::new(3)]
    );
}

#[test]
fn cyclic_history_links_fail_the_load() {
    let json = r#"{
        "step_id": "1",
        "variables": [],
        "history": [
            {"step_id": "1", "prev_step_id": "2"},
            {"step_id": "2", "prev_step_id": "1"}
        ],
        "choices": []
    }"#;
    let error = PlayerState::from_json(json, &no_step_tags(), &no_property_tags())
        .expect_err("cycle should fail");
    assert_eq!(error.code, "STATE_HISTORY_CYCLE");
}

#[test]
fn missing_record_fields_are_reported() {
    let json = r#"{
        "step_id": "",
        "variables": [{"name": "10"}],
        "history": [],
        "choices": []
    }"#;
    let error = PlayerState::from_json(json, &no_step_tags(), &no_property_tags())
        .expect_err("missing value should fail");
    assert_eq!(error.code, "STATE_FIELD_MISSING");
    assert!(error.message.contains("variables.value"));
}

#[test]
fn restore_rejects_repeated_history_step() {
    let mut player = player_for(color_script());
    let state = PlayerState {
        current_step: Some(StepId::new(2)),
        history: vec![StepId::new(1), StepId::new(2), StepId::new(1)],
        ..PlayerState::default()
    };
    let error = player.set_state(&state).expect_err("repeat should fail");
    assert_eq!(error.code, "STATE_HISTORY_CYCLE");
}

#[test]
fn restore_rejects_impossible_edges() {
    let mut player = player_for(color_script());
    // 2 → 1 is not an edge of the definition.
    let state = PlayerState {
        current_step: Some(StepId::new(1)),
        history: vec![StepId::new(2), StepId::new(1)],
        ..PlayerState::default()
    };
    let error = player.set_state(&state).expect_err("bad edge should fail");
    assert_eq!(error.code, "STATE_STRUCTURE_MISMATCH");
    // The failed restore left the player untouched.
    assert!(!player.is_started());
}

#[test]
fn restore_rejects_vanished_choice() {
    let mut player = player_for(color_script());
    let state = PlayerState {
        current_step: Some(StepId::new(2)),
        history: vec![StepId::new(1), StepId::new(2)],
        choices: [(StepId::new(2), ChoiceId::new(9))].into(),
        ..PlayerState::default()
    };
    let error = player
        .set_state(&state)
        .expect_err("unknown choice should fail");
    assert_eq!(error.code, "STATE_CHOICE_NOT_FOUND");
}

#[test]
fn restore_rejects_unknown_step() {
    let mut player = player_for(color_script());
    let state = PlayerState {
        current_step: Some(StepId::new(9)),
        ..PlayerState::default()
    };
    let error = player.set_state(&state).expect_err("unknown step should fail");
    assert_eq!(error.code, "STATE_STEP_NOT_FOUND");
}

#[test]
fn values_unknown_to_current_schema_are_dropped_on_restore() {
    let mut player = player_for(color_script());
    let state = PlayerState {
        current_step: Some(StepId::new(1)),
        values: [
            (PropertyId::new(10), Value::from("red")),
            (PropertyId::new(99), Value::from("gone")),
        ]
        .into(),
        ..PlayerState::default()
    };
    player.set_state(&state).expect("restore should pass");
    assert_eq!(player.value(PropertyId::new(10)), Some(Value::from("red")));
    assert_eq!(player.value(PropertyId::new(99)), None);
}

#[test]
fn jump_to_repositions_without_touching_values() {
    let mut player = player_for(color_script());
    player.start().expect("start should pass");
    player
        .set_value(PropertyId::new(10), Value::from("red"))
        .expect("set should pass");

    player
        .jump_to(
            StepId::new(2),
            &[StepId::new(1), StepId::new(2)],
            &BTreeMap::new(),
        )
        .expect("jump should pass");
    assert_eq!(player.current_step(), Some(StepId::new(2)));
    assert_eq!(player.previous_step(), Some(StepId::new(1)));
    assert_eq!(player.value(PropertyId::new(10)), Some(Value::from("red")));
}

#[test]
fn restore_works_on_a_player_backed_by_a_shared_definition() {
    let definition = Arc::new(color_script());

    let store = MemoryPropertyStore::new(definition.property_ids());
    let mut first = ScriptPlayer::new(Arc::clone(&definition), Box::new(store));
    first.start().expect("start should pass");
    first.advance().expect("advance should pass");
    first
        .select_choice(StepId::new(2), ChoiceId::new(1))
        .expect("choice should apply");
    let state = first.state();

    // A second player over the same definition is independent.
    let store = MemoryPropertyStore::new(definition.property_ids());
    let mut second = ScriptPlayer::new(definition, Box::new(store));
    second.set_state(&state).expect("restore should pass");
    assert_eq!(second.state(), state);
    assert_eq!(first.current_step(), Some(StepId::new(2)));
}
