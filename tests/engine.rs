//! End-to-end tests against the public engine interface.

use gpt_rs::{GenerateOptions, GptConfig, GptEngine, GptError, StopReason};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn test_engine() -> GptEngine {
    GptEngine::random(GptConfig::tiny(), 42)
}

fn greedy(max_new_tokens: usize) -> GenerateOptions {
    GenerateOptions {
        temperature: 0.0,
        max_new_tokens,
        ..GenerateOptions::default()
    }
}

#[test]
fn greedy_generation_is_deterministic() {
    let a = test_engine();
    let b = test_engine();
    let out_a = a.generate("s", "hello world", &greedy(12)).unwrap();
    let out_b = b.generate("s", "hello world", &greedy(12)).unwrap();
    assert_eq!(out_a.generated_text, out_b.generated_text);
    assert_eq!(out_a.tokens_generated, out_b.tokens_generated);
    assert_eq!(out_a.stop_reason, out_b.stop_reason);
}

#[test]
fn fixed_seed_reproduces_sampled_output() {
    let engine = test_engine();
    let options = GenerateOptions {
        temperature: 0.9,
        max_new_tokens: 12,
        seed: 5,
        ..GenerateOptions::default()
    };
    let a = engine.generate("a", "the world", &options).unwrap();
    let b = engine.generate("b", "the world", &options).unwrap();
    assert_eq!(a.generated_text, b.generated_text);
}

#[test]
fn word_boundary_prompt_encodes_to_two_tokens() {
    let engine = test_engine();
    let out = engine.generate("s", "hello world", &greedy(1)).unwrap();
    // "hello" and " world" are single vocabulary entries.
    assert_eq!(out.prompt_tokens, 2);
}

#[test]
fn cancellation_before_first_step_generates_nothing() {
    let engine = test_engine();
    let cancel = Arc::new(AtomicBool::new(true));
    let options = GenerateOptions {
        temperature: 0.0,
        max_new_tokens: 16,
        cancel: Some(Arc::clone(&cancel)),
        ..GenerateOptions::default()
    };
    let out = engine.generate("s", "hello", &options).unwrap();
    assert_eq!(out.stop_reason, StopReason::Cancelled);
    assert_eq!(out.tokens_generated, 0);
    assert_eq!(out.generated_text, "");
}

#[test]
fn window_filling_prompt_is_rejected() {
    let engine = test_engine();
    let max = engine.config().max_seq_len;
    // One token per character; encoding truncates at the window size, so
    // this prompt arrives at exactly max_seq_len tokens.
    let prompt = "x".repeat(max * 2);
    let err = engine.generate("s", &prompt, &greedy(1));
    match err {
        Err(GptError::ContextOverflow { prompt, max: m }) => {
            assert_eq!(prompt, max);
            assert_eq!(m, max);
        }
        other => panic!("expected ContextOverflow, got {other:?}"),
    }
}

#[test]
fn top_k_of_zero_is_an_invalid_config() {
    let engine = test_engine();
    let options = GenerateOptions {
        temperature: 0.9,
        max_new_tokens: 4,
        top_k: Some(0),
        ..GenerateOptions::default()
    };
    let err = engine.generate("s", "hello", &options);
    assert!(matches!(err, Err(GptError::InvalidSamplingConfig(_))));
}

#[test]
fn session_history_survives_across_turns_and_stays_bounded() {
    let engine = test_engine();
    // Enough turns to overflow the 64-token window several times over;
    // trimming must keep every later call valid.
    for turn in 0..20 {
        let out = engine
            .generate("chat", &format!("say {turn}"), &greedy(8))
            .unwrap();
        assert!(out.prompt_tokens > 0);
    }
}

#[test]
fn reset_session_clears_history() {
    let engine = test_engine();
    engine.generate("s", "hello", &greedy(4)).unwrap();
    assert!(engine.reset_session("s"));
    assert!(!engine.reset_session("s"));
    // A fresh session accepts new turns.
    engine.generate("s", "hello", &greedy(4)).unwrap();
}

#[test]
fn distinct_sessions_generate_concurrently() {
    let engine = Arc::new(test_engine());
    let mut handles = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            for _ in 0..3 {
                engine.generate(name, "the time", &greedy(6)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn outcome_reports_usage_and_stop_reason() {
    let engine = test_engine();
    let out = engine.generate("s", "hello world", &greedy(5)).unwrap();
    assert!(out.tokens_generated <= 5);
    assert!(matches!(
        out.stop_reason,
        StopReason::MaxTokens | StopReason::EndOfSequence
    ));
    assert!(!out.stop_reason.as_str().is_empty());
}
