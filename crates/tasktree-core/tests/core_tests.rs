//! Tests for tasktree-core: node semantics, builder validation, tracing

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasktree_core::node::invoke;
use tasktree_core::*;
use tasktree_store::{KvStore, MemoryStore};

#[derive(Default)]
struct Board {
    seen: Vec<String>,
    count: i64,
    flag: bool,
    text: Option<String>,
    parsed: Option<Value>,
}

impl Blackboard for Board {
    fn get(&self, key: &str) -> Option<Value> {
        match key {
            "flag" => Some(json!(self.flag)),
            "count" => Some(json!(self.count)),
            "text" => self.text.clone().map(Value::String),
            "parsed" => self.parsed.clone(),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: Value) -> bool {
        match key {
            "text" => {
                self.text = value.as_str().map(str::to_string);
                true
            }
            "parsed" => {
                self.parsed = Some(value);
                true
            }
            _ => false,
        }
    }
}

fn push(tag: &'static str) -> Behavior<Board> {
    Behavior::sync(move |b: &mut Board| {
        b.seen.push(tag.to_string());
        tag
    })
}

// ===========================================================================
// Sequence
// ===========================================================================

#[tokio::test]
async fn sequence_all_ok_keeps_last_data() {
    let tree = TreeBuilder::new("SeqAllOk")
        .sequence()
        .function(push("a"))
        .function(push("b"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("b"));
    assert_eq!(ctx.board().lock().await.seen, vec!["a", "b"]);
}

#[tokio::test]
async fn sequence_failure_stops_and_carries_last_ok_data() {
    let tree = TreeBuilder::new("SeqAnyFail")
        .sequence()
        .function(push("a"))
        .failure()
        .function(push("c"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(out.data, json!("a"));
    assert_eq!(ctx.board().lock().await.seen, vec!["a"]);
}

#[tokio::test]
async fn sequence_failure_with_own_data_keeps_it() {
    let tree = TreeBuilder::new("SeqFailData")
        .sequence()
        .function(push("a"))
        .function(Behavior::sync_outcome(|_: &mut Board| {
            Outcome::fail(json!("broken"))
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(out.data, json!("broken"));
}

// ===========================================================================
// Selector
// ===========================================================================

#[tokio::test]
async fn selector_all_failures() {
    let tree = TreeBuilder::new("SelectorAllFail")
        .selector()
        .failure()
        .failure()
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
}

#[tokio::test]
async fn selector_all_fail_discards_child_data() {
    let tree = TreeBuilder::new("SelectorDiscard")
        .selector()
        .function(Behavior::sync_outcome(|_: &mut Board| {
            Outcome::fail(json!("first"))
        }))
        .function(Behavior::sync_outcome(|_: &mut Board| {
            Outcome::fail(json!("second"))
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
}

#[tokio::test]
async fn selector_stops_at_first_success() {
    let tree = TreeBuilder::new("SelectorAnyOk")
        .selector()
        .failure()
        .function(push("ok"))
        .function(push("never"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("ok"));
    assert_eq!(ctx.board().lock().await.seen, vec!["ok"]);
}

// ===========================================================================
// RandomSelector
// ===========================================================================

#[tokio::test]
async fn random_selector_follows_seeded_weighted_order() {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    let weights = vec![1.0, 2.0, 3.0];
    let mut rng = StdRng::seed_from_u64(123);
    let expected_order = util::weighted_shuffle(&mut rng, 3, Some(weights.as_slice()));
    // Child 0 fails; the first of 1/2 reached in the shuffled order wins.
    let expected_winner = *expected_order.iter().find(|&&i| i != 0).unwrap();
    let stop = expected_order
        .iter()
        .position(|&i| i == expected_winner)
        .unwrap();
    let expected_visited: Vec<String> = expected_order[..=stop]
        .iter()
        .map(|i| i.to_string())
        .collect();

    let mut builder = TreeBuilder::new("RandomSelector")
        .random_selector_with(Some(weights), Some(123));
    for idx in 0..3usize {
        let ok = idx != 0;
        builder = builder.function(Behavior::sync_outcome(move |b: &mut Board| {
            b.seen.push(idx.to_string());
            if ok {
                Outcome::ok(format!("ok-{idx}"))
            } else {
                Outcome::fail(Value::Null)
            }
        }));
    }
    let tree = builder.build().unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!(format!("ok-{expected_winner}")));
    assert_eq!(ctx.board().lock().await.seen, expected_visited);
}

#[tokio::test]
async fn random_selector_all_fail_discards_child_data() {
    let tree = TreeBuilder::new("RandomSelectorDiscard")
        .random_selector_with(None, Some(7))
        .function(Behavior::sync_outcome(|_: &mut Board| {
            Outcome::fail(json!("a"))
        }))
        .function(Behavior::sync_outcome(|_: &mut Board| {
            Outcome::fail(json!("b"))
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
}

// ===========================================================================
// While
// ===========================================================================

#[tokio::test]
async fn while_runs_until_condition_false() {
    let tree = TreeBuilder::new("WhileOk")
        .while_loop(Condition::func(|b: &Board| b.count < 3))
        .function(Behavior::sync(|b: &mut Board| {
            b.count += 1;
            b.count
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!(3));
    assert_eq!(ctx.board().lock().await.count, 3);
}

#[tokio::test]
async fn while_stops_on_body_failure_returning_last_ok() {
    let tree = TreeBuilder::new("WhileFail")
        .while_loop(Condition::func(|b: &Board| b.count < 5))
        .function(Behavior::sync_outcome(|b: &mut Board| {
            b.count += 1;
            if b.count == 2 {
                Outcome::fail(Value::Null)
            } else {
                Outcome::ok(b.count)
            }
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!(1));
    assert_eq!(ctx.board().lock().await.count, 2);
}

#[tokio::test]
async fn while_immediate_stop_is_fail_none() {
    let tree = TreeBuilder::new("WhileStop")
        .while_loop(Condition::func(|_: &Board| false))
        .function(push("never"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
    assert!(ctx.board().lock().await.seen.is_empty());
}

#[tokio::test]
async fn while_bounded_stops_at_max_loops() {
    let tree = TreeBuilder::new("WhileMaxLoop")
        .while_loop_bounded(Condition::func(|_: &Board| true), 3)
        .function(Behavior::sync(|b: &mut Board| {
            b.count += 1;
            b.count
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!(3));
    assert_eq!(ctx.board().lock().await.count, 3);
}

// ===========================================================================
// If / Else
// ===========================================================================

#[tokio::test]
async fn if_true_runs_then_branch() {
    let tree = TreeBuilder::new("IfTrue")
        .when(Condition::func(|_: &Board| true))
        .function(push("then"))
        .else_branch()
        .function(push("else"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("then"));
    assert_eq!(ctx.board().lock().await.seen, vec!["then"]);
}

#[tokio::test]
async fn if_false_runs_else_branch() {
    let tree = TreeBuilder::new("IfFalse")
        .when(Condition::func(|_: &Board| false))
        .function(push("then"))
        .else_branch()
        .function(push("else"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("else"));
    assert_eq!(ctx.board().lock().await.seen, vec!["else"]);
}

#[tokio::test]
async fn if_false_without_else_is_ok_none() {
    let tree = TreeBuilder::new("IfNoElse")
        .when(Condition::func(|_: &Board| false))
        .function(push("then"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert!(out.data.is_null());
    assert!(ctx.board().lock().await.seen.is_empty());
}

#[tokio::test]
async fn if_condition_from_board_key_truthiness() {
    let tree = TreeBuilder::new("IfAttr")
        .when("flag")
        .function(push("then"))
        .else_branch()
        .function(push("else"))
        .build()
        .unwrap();

    let ctx = Context::new(Board {
        flag: true,
        ..Board::default()
    });
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("then"));
}

// ===========================================================================
// ForceOk / ForceFail / Return / Invert
// ===========================================================================

#[tokio::test]
async fn force_ok_keeps_child_data_or_uses_factory() {
    let plain = TreeBuilder::new("ForceOk")
        .force_ok()
        .failure()
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = plain.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert!(out.data.is_null());

    let with_factory = TreeBuilder::new("ForceOkFactory")
        .force_ok_with(|b: &Board| json!(b.count))
        .failure()
        .build()
        .unwrap();
    let ctx = Context::new(Board {
        count: 7,
        ..Board::default()
    });
    let out = with_factory.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert_eq!(out.data, json!(7));
}

#[tokio::test]
async fn force_fail_keeps_child_data_or_uses_factory() {
    let plain = TreeBuilder::new("ForceFail")
        .force_fail()
        .function(push("child"))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = plain.run(&ctx).await.unwrap();
    assert!(!out.is_ok());
    assert_eq!(out.data, json!("child"));

    let with_factory = TreeBuilder::new("ForceFailFactory")
        .force_fail_with(|_: &Board| json!("bb"))
        .function(push("child"))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = with_factory.run(&ctx).await.unwrap();
    assert!(!out.is_ok());
    assert_eq!(out.data, json!("bb"));
}

#[tokio::test]
async fn returning_keeps_status_replaces_data() {
    let ok = TreeBuilder::new("ReturnOk")
        .returning(|_: &Board| json!("ret"))
        .function(push("child"))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = ok.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert_eq!(out.data, json!("ret"));

    let fail = TreeBuilder::new("ReturnFail")
        .returning(|_: &Board| json!("ret"))
        .failure()
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = fail.run(&ctx).await.unwrap();
    assert!(!out.is_ok());
    assert_eq!(out.data, json!("ret"));
}

#[tokio::test]
async fn invert_flips_status_keeps_data() {
    let inverted_fail = TreeBuilder::new("Invert")
        .invert()
        .failure()
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = inverted_fail.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert!(out.data.is_null());

    let inverted_ok = TreeBuilder::new("InvertOk")
        .invert()
        .function(push("ok"))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = inverted_ok.run(&ctx).await.unwrap();
    assert!(!out.is_ok());
    assert_eq!(out.data, json!("ok"));
}

// ===========================================================================
// Retry
// ===========================================================================

#[tokio::test]
async fn retry_succeeds_after_failures() {
    let tree = TreeBuilder::new("RetrySuccess")
        .retry(3)
        .function(Behavior::sync_outcome(|b: &mut Board| {
            b.count += 1;
            if b.count < 3 {
                Outcome::fail(Value::Null)
            } else {
                Outcome::ok("ok")
            }
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("ok"));
    assert_eq!(ctx.board().lock().await.count, 3);
}

#[tokio::test]
async fn retry_exhausted_is_fail_none() {
    let tree = TreeBuilder::new("RetryFail")
        .retry(3)
        .function(Behavior::sync_outcome(|b: &mut Board| {
            b.count += 1;
            Outcome::fail(json!("attempt"))
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
    assert_eq!(ctx.board().lock().await.count, 3);
}

#[tokio::test]
async fn retry_sleep_schedule_clamps_to_last_gap() {
    let tree = TreeBuilder::new("RetrySleep")
        .retry_with(3, RetrySleep::Schedule(vec![Duration::from_millis(5)]))
        .function(Behavior::sync_outcome(|b: &mut Board| {
            b.count += 1;
            Outcome::fail(Value::Null)
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(ctx.board().lock().await.count, 3);
}

// ===========================================================================
// Function / Assert leaves
// ===========================================================================

#[tokio::test]
async fn function_async_behavior_runs_against_board_handle() {
    let tree = TreeBuilder::new("AsyncFn")
        .function(Behavior::async_fn(|board: BoardHandle<Board>| async move {
            board.update(|b| b.count += 10).await;
            "done"
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("done"));
    assert_eq!(ctx.board().lock().await.count, 10);
}

#[tokio::test]
async fn function_error_becomes_fail_none_with_trace_attribute() {
    let tree = TreeBuilder::new("FnErr")
        .function(Behavior::try_sync(|_: &mut Board| {
            anyhow::bail!("boom")
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
    let snap = ctx.trace_snapshot();
    let span = snap.find_by_kind("Function").unwrap();
    assert_eq!(span.attributes["error"], json!("boom"));
}

#[tokio::test]
async fn assert_true_false_and_error() {
    let truthy = TreeBuilder::new("AssertOk")
        .assert_that(|b: &Board| Ok(b.count == 0))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = truthy.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert_eq!(out.data, json!(true));

    let falsy = TreeBuilder::new("AssertFail")
        .assert_that(|b: &Board| Ok(b.count == 1))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = falsy.run(&ctx).await.unwrap();
    assert!(!out.is_ok());
    assert!(out.data.is_null());

    let erring = TreeBuilder::new("AssertErr")
        .assert_that(|_: &Board| anyhow::bail!("bad predicate"))
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    let out = erring.run(&ctx).await.unwrap();
    assert!(!out.is_ok());
}

// ===========================================================================
// WriteBlackboard / ParseJSON
// ===========================================================================

#[tokio::test]
async fn write_blackboard_stores_prev_and_passes_it_through() {
    let tree = TreeBuilder::new("Write")
        .sequence()
        .constant("hello")
        .write_blackboard("text")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("hello"));
    assert_eq!(ctx.board().lock().await.text.as_deref(), Some("hello"));
}

#[tokio::test]
async fn write_blackboard_unknown_key_fails() {
    let tree = TreeBuilder::new("WriteUnknown")
        .sequence()
        .constant("hello")
        .write_blackboard("nope")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    // The rejected write fails with no data of its own, so the enclosing
    // sequence substitutes the last successful child's data.
    assert!(!out.is_ok());
    assert_eq!(out.data, json!("hello"));
    assert!(ctx.board().lock().await.text.is_none());
}

#[tokio::test]
async fn parse_json_from_prev_handles_fenced_payload() {
    let tree = TreeBuilder::new("Parse")
        .sequence()
        .constant("```json\n{\"answer\": \"ok\", \"count\": 2}\n```")
        .parse_json("parsed")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!({"answer": "ok", "count": 2}));
    assert_eq!(
        ctx.board().lock().await.parsed,
        Some(json!({"answer": "ok", "count": 2}))
    );
}

#[tokio::test]
async fn parse_json_unparseable_fails_with_original_text() {
    let tree = TreeBuilder::new("ParseBad")
        .sequence()
        .constant("{ this is not json }")
        .parse_json("parsed")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(out.data, json!("{ this is not json }"));
    assert!(ctx.board().lock().await.parsed.is_none());
}

#[tokio::test]
async fn parse_json_from_board_key() {
    let tree = TreeBuilder::new("ParseKey")
        .parse_json_from("text", "parsed")
        .build()
        .unwrap();

    let ctx = Context::new(Board {
        text: Some("{\"x\": 1,}".to_string()),
        ..Board::default()
    });
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(ctx.board().lock().await.parsed, Some(json!({"x": 1})));
}

#[tokio::test]
async fn parse_json_with_custom_loader_overrides_the_parser() {
    let tree = TreeBuilder::new("ParseCustom")
        .sequence()
        .constant("answer=42")
        .parse_json_with(Source::Prev, "parsed", |text: &str| {
            text.strip_prefix("answer=")
                .and_then(|v| v.parse::<i64>().ok())
                .map(|n| json!({ "answer": n }))
        })
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!({"answer": 42}));
    assert_eq!(
        ctx.board().lock().await.parsed,
        Some(json!({"answer": 42}))
    );
}

#[tokio::test]
async fn parse_json_with_loader_none_fails_with_original_text() {
    let tree = TreeBuilder::new("ParseCustomBad")
        .sequence()
        .constant("not-a-pair")
        .parse_json_with(Source::Prev, "parsed", |_: &str| None)
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(out.data, json!("not-a-pair"));
    assert!(ctx.board().lock().await.parsed.is_none());
}

// ===========================================================================
// Wrapper
// ===========================================================================

#[tokio::test]
async fn wrapper_brackets_child_and_returns_its_outcome() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_wrap = calls.clone();

    let tree = TreeBuilder::new("WrapperOk")
        .wrapper(move |node, ctx, tracer, prev| {
            let calls = calls_in_wrap.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let out = invoke(&node, &ctx, &tracer, &prev).await?;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(out)
            }
        })
        .function(push("ok"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn wrapper_error_is_absorbed_into_fail_none() {
    let tree = TreeBuilder::new("WrapperBad")
        .wrapper(|_node, _ctx, _tracer, _prev| async move {
            anyhow::bail!("wrapper exploded")
        })
        .function(push("ok"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());
}

// ===========================================================================
// Subtree
// ===========================================================================

#[tokio::test]
async fn subtree_shares_the_parent_board() {
    let sub = TreeBuilder::new("Sub")
        .function(Behavior::sync(|b: &mut Board| {
            b.count += 1;
            b.count
        }))
        .build()
        .unwrap();
    let tree = TreeBuilder::new("Parent")
        .sequence()
        .subtree(sub)
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(ctx.board().lock().await.count, 1);
}

struct ChildBoard {
    value: i64,
}

impl Blackboard for ChildBoard {}

#[tokio::test]
async fn mapped_subtree_isolates_the_parent_board() {
    let sub = TreeBuilder::new("Sub")
        .function(Behavior::sync(|b: &mut ChildBoard| {
            b.value += 1;
            b.value
        }))
        .build()
        .unwrap();
    let tree = TreeBuilder::new("Parent")
        .sequence()
        .subtree_mapped(sub, |b: &Board| ChildBoard { value: b.count })
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!(1));
    assert_eq!(ctx.board().lock().await.count, 0);
}

// ===========================================================================
// Parallel
// ===========================================================================

#[tokio::test]
async fn parallel_children_run_concurrently() {
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let b1 = barrier.clone();
    let b2 = barrier.clone();

    let tree = TreeBuilder::new("Parallel")
        .parallel()
        .function(Behavior::async_fn(move |_: BoardHandle<Board>| {
            let barrier = b1.clone();
            async move {
                barrier.wait().await;
                "a"
            }
        }))
        .function(Behavior::async_fn(move |_: BoardHandle<Board>| {
            let barrier = b2.clone();
            async move {
                barrier.wait().await;
                "b"
            }
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tokio::time::timeout(Duration::from_secs(1), tree.run(&ctx))
        .await
        .expect("parallel children must not serialize on the barrier")
        .unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!(["a", "b"]));
}

#[tokio::test]
async fn parallel_failure_leaves_null_at_its_position() {
    let tree = TreeBuilder::new("ParallelFail")
        .parallel()
        .constant("a")
        .failure()
        .constant("c")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(out.data, json!(["a", null, "c"]));
}

#[tokio::test]
async fn parallel_with_limit_still_completes_in_order() {
    let tree = TreeBuilder::new("ParallelLimited")
        .parallel_limited(1)
        .constant(1)
        .constant(2)
        .constant(3)
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!([1, 2, 3]));
}

// ===========================================================================
// Gather
// ===========================================================================

fn gather_child(fail: bool) -> Tree<ChildBoard> {
    let builder = TreeBuilder::new("Child");
    if fail {
        builder.failure().build().unwrap()
    } else {
        builder
            .function(Behavior::sync(|b: &mut ChildBoard| b.value))
            .build()
            .unwrap()
    }
}

#[tokio::test]
async fn gather_all_ok_preserves_input_order() {
    let tree = TreeBuilder::new("GatherAllOk")
        .gather(|_: &Board| {
            (
                vec![gather_child(false), gather_child(false)],
                vec![ChildBoard { value: 1 }, ChildBoard { value: 2 }],
            )
        })
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!([1, 2]));
}

#[tokio::test]
async fn gather_any_fail_keeps_list_with_null() {
    let tree = TreeBuilder::new("GatherAnyFail")
        .gather(|_: &Board| {
            (
                vec![gather_child(false), gather_child(true)],
                vec![ChildBoard { value: 1 }, ChildBoard { value: 2 }],
            )
        })
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert_eq!(out.data, json!([1, null]));
}

#[tokio::test]
async fn gather_length_mismatch_is_a_programming_error() {
    let tree = TreeBuilder::new("GatherMismatch")
        .gather(|_: &Board| {
            (
                vec![gather_child(false)],
                vec![ChildBoard { value: 1 }, ChildBoard { value: 2 }],
            )
        })
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let err = tree.run(&ctx).await.unwrap_err();

    assert!(matches!(
        err,
        Error::GatherLengthMismatch { trees: 1, boards: 2 }
    ));
}

// ===========================================================================
// Timeout
// ===========================================================================

#[tokio::test]
async fn timeout_fast_child_completes() {
    let tree = TreeBuilder::new("TimeoutFast")
        .timeout(Duration::from_secs(1))
        .function(Behavior::async_fn(|_: BoardHandle<Board>| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            "fast"
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("fast"));
}

#[tokio::test]
async fn timeout_without_fallback_is_fail_none() {
    let tree = TreeBuilder::new("TimeoutNoFallback")
        .timeout(Duration::from_millis(30))
        .function(Behavior::async_fn(|_: BoardHandle<Board>| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "slow"
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(!out.is_ok());
    assert!(out.data.is_null());

    // The aborted child's span is finalized as cancelled.
    let snap = ctx.trace_snapshot();
    let child = snap.find_by_kind("Function").unwrap();
    assert_eq!(child.status, TraceStatus::Cancelled);
    assert!(child.ended_at.is_some());
}

#[tokio::test]
async fn timeout_with_fallback_runs_it_after_cancelling() {
    let tree = TreeBuilder::new("TimeoutFallback")
        .timeout(Duration::from_millis(30))
        .function(Behavior::async_fn(|_: BoardHandle<Board>| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "slow"
        }))
        .constant("fallback")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("fallback"));
}

// ===========================================================================
// Terminable
// ===========================================================================

#[tokio::test]
async fn terminable_without_signal_returns_child_outcome() {
    let store = Arc::new(MemoryStore::new());
    let tree = TreeBuilder::new("TerminableNoSignal")
        .terminable(
            |_: &Board| "term:none".to_string(),
            TerminableOptions::default()
                .monitor_interval(Duration::from_millis(10))
                .store(store),
        )
        .function(Behavior::async_fn(|_: BoardHandle<Board>| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            "done"
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("done"));
}

#[tokio::test]
async fn terminable_signal_cancels_child_and_runs_fallback() {
    let store = Arc::new(MemoryStore::new());
    let tree = TreeBuilder::new("TerminableTerminated")
        .terminable(
            |_: &Board| "term:job".to_string(),
            TerminableOptions::default()
                .monitor_interval(Duration::from_millis(10))
                .store(store.clone()),
        )
        .function(Behavior::async_fn(|_: BoardHandle<Board>| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "done"
        }))
        .fallback()
        .constant("fallback")
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let signal_store = store.clone();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        signal_store.set("term:job", "1", None).await.unwrap();
    });

    let out = tree.run(&ctx).await.unwrap();
    trigger.await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("fallback"));
    // The signal key is consumed when it triggers.
    assert!(!store.exists("term:job").await.unwrap());
}

// ===========================================================================
// Cacher
// ===========================================================================

fn counting_compute(calls: Arc<AtomicUsize>) -> Behavior<Board> {
    Behavior::sync(move |b: &mut Board| {
        calls.fetch_add(1, Ordering::SeqCst);
        b.count += 1;
        b.count
    })
}

#[tokio::test]
async fn cacher_miss_then_hit_skips_the_child() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let tree = TreeBuilder::new("CacherNoValidator")
        .cacher(
            |_: &Board| "cache:basic".to_string(),
            CacherOptions::default()
                .store(store.clone())
                .expiration(Duration::from_secs(5)),
        )
        .function(counting_compute(calls.clone()))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert_eq!(out.data, json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert_eq!(out.data, json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.board().lock().await.count, 0);

    let snap = ctx.trace_snapshot();
    let span = snap.find_by_kind("Cacher").unwrap();
    assert_eq!(span.attributes["cache"], json!("hit"));
}

#[tokio::test]
async fn cacher_validator_mismatch_behaves_as_miss() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let build = |validator: &'static str| {
        TreeBuilder::new("CacherValidator")
            .cacher(
                |_: &Board| "cache:validated".to_string(),
                CacherOptions::default()
                    .store(store.clone())
                    .validator(move |_: &Board| validator.to_string()),
            )
            .function(counting_compute(calls.clone()))
            .build()
            .unwrap()
    };

    let v1 = build("v1");
    let ctx = Context::new(Board::default());
    assert_eq!(v1.run(&ctx).await.unwrap().data, json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let ctx = Context::new(Board::default());
    assert_eq!(v1.run(&ctx).await.unwrap().data, json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let v2 = build("v2");
    let ctx = Context::new(Board::default());
    let out = v2.run(&ctx).await.unwrap();
    assert!(out.is_ok());
    assert_eq!(out.data, json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.board().lock().await.count, 1);
}

#[tokio::test]
async fn cacher_does_not_cache_failures() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_child = calls.clone();

    let tree = TreeBuilder::new("CacherFail")
        .cacher(
            |_: &Board| "cache:fail".to_string(),
            CacherOptions::default().store(store.clone()),
        )
        .function(Behavior::sync_outcome(move |_: &mut Board| {
            calls_in_child.fetch_add(1, Ordering::SeqCst);
            Outcome::fail(Value::Null)
        }))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    assert!(!tree.run(&ctx).await.unwrap().is_ok());
    let ctx = Context::new(Board::default());
    assert!(!tree.run(&ctx).await.unwrap().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!store.exists("cache:fail").await.unwrap());
}

// ===========================================================================
// Custom nodes through BuildSpec
// ===========================================================================

struct ForceValueNode {
    meta: Meta,
    child: NodeRef<Board>,
    value: Value,
}

#[async_trait]
impl Node<Board> for ForceValueNode {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "ForceValue"
    }

    fn children(&self) -> &[NodeRef<Board>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<Board>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        invoke(&self.child, ctx, tracer, prev).await?;
        Ok(Outcome::ok(self.value.clone()))
    }
}

struct ForceValueSpec {
    value: Value,
}

impl BuildSpec<Board> for ForceValueSpec {
    fn kind(&self) -> &'static str {
        "ForceValue"
    }

    fn build(
        self: Box<Self>,
        meta: Meta,
        mut children: Vec<NodeRef<Board>>,
    ) -> Result<NodeRef<Board>> {
        if children.len() != 1 {
            return Err(Error::bad_arity(
                "ForceValue",
                meta.name.clone(),
                "exactly 1",
                children.len(),
            ));
        }
        Ok(Arc::new(ForceValueNode {
            meta,
            child: children.remove(0),
            value: self.value,
        }))
    }
}

#[tokio::test]
async fn custom_build_spec_attaches_and_executes() {
    let tree = TreeBuilder::new("CustomTree")
        .attach_container(ForceValueSpec { value: json!("ok") })
        .function(push("child"))
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();

    assert!(out.is_ok());
    assert_eq!(out.data, json!("ok"));
    assert_eq!(ctx.board().lock().await.seen, vec!["child"]);
}

// ===========================================================================
// Trace persistence
// ===========================================================================

#[tokio::test]
async fn file_trace_storage_round_trips_a_run() {
    let tree = TreeBuilder::new("Persisted")
        .sequence()
        .constant("payload")
        .build()
        .unwrap();
    let ctx = Context::new(Board::default());
    tree.run(&ctx).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let storage = FileTraceStorage::new(dir.path());
    let id = storage.save(&ctx.trace_snapshot()).await.unwrap();
    let loaded = storage.query(&id).await.unwrap();

    assert_eq!(loaded["name"], json!("ROOT"));
    assert_eq!(loaded["children"][0]["kind"], json!("Sequence"));
    assert_eq!(loaded["children"][0]["status"], json!("ok"));
    assert_eq!(
        loaded["children"][0]["children"][0]["name"],
        json!("Persisted/Sequence0/Constant0")
    );
}

// ===========================================================================
// Trace shape
// ===========================================================================

#[tokio::test]
async fn trace_mirrors_execution_in_order() {
    let tree = TreeBuilder::new("Traced")
        .sequence()
        .named("first")
        .function(push("a"))
        .named("second")
        .failure()
        .build()
        .unwrap();

    let ctx = Context::new(Board::default());
    let out = tree.run(&ctx).await.unwrap();
    assert!(!out.is_ok());

    let snap = ctx.trace_snapshot();
    assert_eq!(snap.name, "ROOT");
    let seq = &snap.children[0];
    assert_eq!(seq.kind, "Sequence");
    assert_eq!(seq.status, TraceStatus::Fail);
    let names: Vec<_> = seq.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Traced/Sequence0/first", "Traced/Sequence0/second"]);
    assert_eq!(seq.children[0].status, TraceStatus::Ok);
    assert_eq!(seq.children[1].status, TraceStatus::Fail);
}
