//! Property-based tests for parameters, rules and GateKeeper lookups.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use actionable::core::{
    rules, FunctionoidState, ParameterSet, State, StateChange, StateHistory, TerminalState,
    TypedValue,
};
use actionable::gatekeeper::GateKeeper;
use actionable::Command;
use chrono::Utc;
use proptest::prelude::*;

prop_compose! {
    fn arbitrary_state()(variant in 0..6u8) -> FunctionoidState {
        match variant {
            0 => FunctionoidState::Initial,
            1 => FunctionoidState::Scheduled,
            2 => FunctionoidState::Running,
            3 => FunctionoidState::Warning,
            4 => FunctionoidState::Error,
            _ => FunctionoidState::Done,
        }
    }
}

prop_compose! {
    fn arbitrary_value()(
        variant in 0..5u8,
        int in any::<i64>(),
        text in "[a-z]{0,8}",
    ) -> TypedValue {
        match variant {
            0 => TypedValue::Bool(int % 2 == 0),
            1 => TypedValue::Int(int),
            2 => TypedValue::UInt(int.unsigned_abs()),
            3 => TypedValue::Str(text),
            _ => TypedValue::IntVec(vec![int, int / 2]),
        }
    }
}

prop_compose! {
    fn arbitrary_params()(
        entries in prop::collection::btree_map("[a-d]", arbitrary_value(), 0..4)
    ) -> ParameterSet {
        entries.into_iter().collect()
    }
}

fn context_name(index: usize) -> String {
    format!("ctx{}", index)
}

fn command_with_defaults() -> Command {
    let command = Command::new("cmd", 0_i64, |_, _| Ok(TerminalState::Done));
    command.register_parameter_with_default_rule("a", 1_i64).unwrap();
    command.register_parameter_with_default_rule("b", "default".to_string()).unwrap();
    command
}

proptest! {
    #[test]
    fn state_is_final_iff_terminal(state in arbitrary_state()) {
        let terminal = matches!(
            state,
            FunctionoidState::Done | FunctionoidState::Warning | FunctionoidState::Error
        );
        prop_assert_eq!(state.is_final(), terminal);
        prop_assert!(!state.is_error() || state.is_final());
    }

    #[test]
    fn first_context_holding_item_wins(
        holders in prop::collection::vec(any::<bool>(), 1..6),
        values in prop::collection::vec(any::<i64>(), 6)
    ) {
        let mut gatekeeper = GateKeeper::new();
        for (index, holds) in holders.iter().enumerate() {
            let mut params = ParameterSet::new();
            if *holds {
                params.insert("item", values[index]).unwrap();
            }
            gatekeeper.add_parameters(context_name(index), params).unwrap();
        }

        let contexts: Vec<String> = (0..holders.len()).map(context_name).collect();
        let expected = holders
            .iter()
            .position(|holds| *holds)
            .map(|index| TypedValue::Int(values[index]));

        prop_assert_eq!(
            gatekeeper.get_parameter("ns", "cmd", "item", &contexts).cloned(),
            expected
        );
    }

    #[test]
    fn more_specific_key_wins_within_context(
        plain in any::<i64>(),
        scoped in any::<i64>(),
        full in any::<i64>(),
    ) {
        let mut params = ParameterSet::new();
        params.insert("item", plain).unwrap();
        params.insert("cmd.item", scoped).unwrap();
        let mut gatekeeper = GateKeeper::new();
        gatekeeper.add_parameters("ctx", params).unwrap();

        prop_assert_eq!(
            gatekeeper.get_parameter("ns", "cmd", "item", &["ctx"]),
            Some(&TypedValue::Int(scoped))
        );
        prop_assert_eq!(
            gatekeeper.get_parameter("ns", "other", "item", &["ctx"]),
            Some(&TypedValue::Int(plain))
        );

        let mut higher = ParameterSet::new();
        higher.insert("ns.cmd.item", full).unwrap();
        gatekeeper.add_parameters("high", higher).unwrap();
        prop_assert_eq!(
            gatekeeper.get_parameter("ns", "cmd", "item", &["high", "ctx"]),
            Some(&TypedValue::Int(full))
        );
    }

    #[test]
    fn merge_overlays_given_values(params in arbitrary_params()) {
        let command = command_with_defaults();
        let merged = command.merge_parameters_with_defaults(&params);

        for (name, value) in params.iter() {
            prop_assert_eq!(merged.get(name).unwrap(), value);
        }
        for name in ["a", "b"] {
            if !params.contains(name) {
                let defaults = command.default_params();
                prop_assert_eq!(
                    merged.get(name).unwrap(),
                    defaults.get(name).unwrap()
                );
            }
        }
        prop_assert_eq!(merged.to_mutable().len(), merged.len());
    }

    #[test]
    fn merging_never_changes_defaults(params in arbitrary_params()) {
        let command = command_with_defaults();
        let before = command.default_params();
        let _ = command.merge_parameters_with_defaults(&params);
        let after = command.default_params();

        prop_assert_eq!(before.len(), after.len());
        for (name, value) in before.iter() {
            prop_assert_eq!(after.get(name).unwrap(), value);
        }
    }

    #[test]
    fn in_range_agrees_with_out_of_range(
        lower in -100i64..0,
        upper in 1i64..100,
        x in -200i64..200,
    ) {
        let inside = rules::in_range(lower, upper).unwrap();
        let outside = rules::out_of_range(lower, upper).unwrap();
        let on_bound = x == lower || x == upper;

        prop_assert_eq!(inside.check(&x).ok, lower < x && x < upper);
        prop_assert_eq!(outside.check(&x).ok, x < lower || upper < x);
        if !on_bound {
            prop_assert_ne!(inside.check(&x).ok, outside.check(&x).ok);
        }
    }

    #[test]
    fn not_inverts_any_rule(bound in any::<i64>(), x in any::<i64>()) {
        let rule = rules::greater_than(bound);
        let inverted = rules::not(rules::greater_than(bound));
        prop_assert_eq!(rule.check(&x).ok, !inverted.check(&x).ok);
    }

    #[test]
    fn history_preserves_order(targets in prop::collection::vec("[a-z]{1,6}", 1..10)) {
        let mut history = StateHistory::new();
        let mut from: Option<String> = None;

        for target in &targets {
            history = history.record(StateChange {
                machine: Some("run".into()),
                from: from.clone(),
                to: Some(target.clone()),
                timestamp: Utc::now(),
                cause: "transition".into(),
            });
            from = Some(target.clone());
        }

        let path = history.get_path();
        prop_assert_eq!(history.len(), targets.len());
        prop_assert_eq!(path.len(), targets.len() + 1);
        prop_assert_eq!(path[0], None);
        for (step, target) in path[1..].iter().zip(&targets) {
            prop_assert_eq!(*step, Some(target.as_str()));
        }
    }

    #[test]
    fn history_record_is_pure(target in "[a-z]{1,6}") {
        let history = StateHistory::new();
        let recorded = history.record(StateChange {
            machine: None,
            from: None,
            to: Some(target),
            timestamp: Utc::now(),
            cause: "engage".into(),
        });

        prop_assert_eq!(history.len(), 0);
        prop_assert_eq!(recorded.len(), 1);
    }

    #[test]
    fn typed_value_roundtrip_serialization(value in arbitrary_value()) {
        let json = serde_json::to_string(&value).unwrap();
        let deserialized: TypedValue = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(value, deserialized);
    }
}
