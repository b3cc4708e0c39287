//! Property tests for the confidence, loop and log policies

use datasci::agent::{
    ExecutionLog, IterationLog, OutputKind, ToolCallLog, ToolCallRecord, clamp_confidence, detect_loop,
};
use datasci::llm::TokenUsage;
use proptest::prelude::*;
use serde_json::json;

fn arb_record() -> impl Strategy<Value = ToolCallRecord> {
    (
        prop_oneof![Just("execute_code"), Just("write_code"), Just("profile_data")],
        any::<bool>(),
    )
        .prop_map(|(name, had_error)| ToolCallRecord::new(name, had_error))
}

fn arb_iteration() -> impl Strategy<Value = (u64, u64, usize)> {
    (0u64..5_000, 0u64..2_000, 0usize..3)
}

fn build_log(iterations: &[(u64, u64, usize)], confidence: f64) -> ExecutionLog {
    let mut log = ExecutionLog::new("What is the mean revenue?");
    for (i, (input_tokens, output_tokens, calls)) in iterations.iter().enumerate() {
        let mut iteration = IterationLog::new(i as u32 + 1)
            .with_reasoning(Some(format!("step {}", i + 1)))
            .with_usage(
                "smart-model",
                TokenUsage {
                    input_tokens: *input_tokens,
                    output_tokens: *output_tokens,
                },
            );
        for c in 0..*calls {
            iteration.push_tool_call(ToolCallLog::new("execute_code", json!({"code": format!("result = {}", c)})));
        }
        log.add_iteration(iteration);
    }
    log.finalize(OutputKind::Analysis, confidence, "The mean is 4.");
    log
}

proptest! {
    #[test]
    fn token_totals_match_iterations(iterations in prop::collection::vec(arb_iteration(), 0..10)) {
        let log = build_log(&iterations, 0.5);

        let prompt: u64 = log.iterations.iter().map(|i| i.prompt_tokens).sum();
        let completion: u64 = log.iterations.iter().map(|i| i.completion_tokens).sum();
        let calls: usize = log.iterations.iter().map(|i| i.tool_calls.len()).sum();
        prop_assert_eq!(log.total_prompt_tokens, prompt);
        prop_assert_eq!(log.total_completion_tokens, completion);
        prop_assert_eq!(log.total_tokens, prompt + completion);
        prop_assert_eq!(log.total_tool_calls, calls as u64);
    }

    #[test]
    fn renderings_are_stable(
        iterations in prop::collection::vec(arb_iteration(), 0..6),
        confidence in prop_oneof![Just(0.1), Just(0.5), Just(0.85)],
    ) {
        let log = build_log(&iterations, confidence);

        prop_assert_eq!(log.to_markdown(), log.to_markdown());
        let json = log.to_json().unwrap();
        let parsed = ExecutionLog::from_json(&json).unwrap();
        prop_assert_eq!(parsed.to_json().unwrap(), json);
        prop_assert_eq!(parsed.to_markdown(), log.to_markdown());
    }

    #[test]
    fn confidence_always_in_unit_range(value in any::<f64>()) {
        let clamped = clamp_confidence(value);
        prop_assert!((0.0..=1.0).contains(&clamped));
    }

    #[test]
    fn short_histories_never_loop(history in prop::collection::vec(arb_record(), 0..4)) {
        prop_assert!(!detect_loop(&history));
    }

    #[test]
    fn clean_histories_never_loop(names in prop::collection::vec(Just("execute_code"), 4..12)) {
        let history: Vec<ToolCallRecord> = names.into_iter().map(|n| ToolCallRecord::new(n, false)).collect();
        prop_assert!(!detect_loop(&history));
    }
}
