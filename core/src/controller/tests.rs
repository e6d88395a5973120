//! Run lifecycle tests

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use maplit::hashmap;

use super::*;
use crate::context::BufferConsole;
use crate::events::Topic;

/* ===================== Test Helpers ===================== */

/// Records event topics in emission order
#[derive(Clone, Default)]
struct Recorder {
    topics: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn attach(&self, options: RunOptions) -> RunOptions {
        let (a, b, c) = (self.clone(), self.clone(), self.clone());
        options
            .on_start(move |e| a.push(e))
            .on_step(move |e| b.push(e))
            .on_end(move |e| c.push(e))
    }

    fn push(&self, event: &Event) {
        let label = match event {
            Event::End(state) => format!("end:{}", state),
            other => other.topic().to_string(),
        };
        self.topics.lock().unwrap().push(label);
    }

    fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }

    fn count(&self, topic: &str) -> usize {
        self.topics()
            .iter()
            .filter(|t| t.split(':').next() == Some(topic))
            .count()
    }
}

/// Console whose every write panics
struct PanickingConsole;

impl crate::context::Console for PanickingConsole {
    fn log(&self, line: &str) {
        panic!("console write failed: {}", line);
    }
}

fn quiet_options() -> (RunOptions, Arc<BufferConsole>) {
    let console = Arc::new(BufferConsole::new());
    (RunOptions::new().console(console.clone()), console)
}

/* ===================== Events ===================== */

#[tokio::test]
async fn test_three_iteration_loop_emits_three_steps() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let controller = run(
        "for (let i of range(3)) { let x = i }",
        recorder.attach(options),
    )
    .expect("Should load");

    controller.execution_end().await.expect("Run failed");
    assert_eq!(
        recorder.topics(),
        vec!["start", "step", "step", "step", "end:completed"]
    );
    assert_eq!(controller.state(), RunState::Completed);
}

#[tokio::test]
async fn test_start_and_end_fire_once_even_on_failure() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let controller = run(
        "for (let i of range(2)) { }\nthrow 'bad'",
        recorder.attach(options),
    )
    .expect("Should load");

    assert!(controller.execution_end().await.is_err());
    let topics = recorder.topics();
    assert_eq!(topics.first().map(String::as_str), Some("start"));
    assert_eq!(topics.last().map(String::as_str), Some("end:failed"));
    assert_eq!(recorder.count("start"), 1);
    assert_eq!(recorder.count("end"), 1);
}

#[tokio::test]
async fn test_controller_subscriptions() {
    let (options, _) = quiet_options();
    let controller = run("step()\nstep()", options.granularity(Granularity::Explicit))
        .expect("Should load");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    controller.on(Topic::Step, move |e| {
        if let Event::Step(info) = e {
            sink.lock().unwrap().push(info.index);
        }
    });

    controller.execution_end().await.expect("Run failed");
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
}

/* ===================== Completion Futures ===================== */

#[tokio::test]
async fn test_empty_stack_returns_program_value() {
    let (options, _) = quiet_options();
    let controller = run("let x = 20\nreturn x + 1", options).expect("Should load");
    assert_eq!(controller.empty_stack().await, Ok(Val::Num(21.0)));
    assert_eq!(controller.execution_end().await, Ok(()));
}

#[tokio::test]
async fn test_thrown_bare_value_is_surfaced() {
    let (options, _) = quiet_options();
    let controller = run("throw 42", options).expect("Should load");

    match controller.empty_stack().await {
        Err(RunError::Execution(err)) => {
            assert_eq!(err.message(), "42");
            assert_eq!(err.raw(), &Val::Num(42.0));
        }
        other => panic!("Expected execution error, got {:?}", other),
    }
    assert!(matches!(
        controller.execution_end().await,
        Err(RunError::Execution(_))
    ));
    assert_eq!(controller.state(), RunState::Failed);
}

#[tokio::test]
async fn test_runaway_recursion_fails_the_run() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let controller = run(
        "function f(n) { return f(n + 1) }\nf(0)",
        recorder.attach(options),
    )
    .expect("Should load");

    match controller.execution_end().await {
        Err(RunError::Execution(err)) => assert_eq!(err.code(), Some(codes::STACK_OVERFLOW)),
        other => panic!("Expected execution error, got {:?}", other),
    }
    assert_eq!(controller.state(), RunState::Failed);
    assert_eq!(recorder.count("end"), 1);
}

#[tokio::test]
async fn test_panicking_main_task_still_ends_run() {
    let recorder = Recorder::default();
    let options = recorder.attach(RunOptions::new().console(Arc::new(PanickingConsole)));
    let controller = run("print('boom')", options).expect("Should load");

    let ended = tokio::time::timeout(Duration::from_secs(1), controller.execution_end()).await;
    match ended {
        Ok(Err(RunError::Execution(err))) => assert_eq!(err.code(), Some(codes::TASK_PANICKED)),
        other => panic!("Expected execution error, got {:?}", other),
    }
    assert!(controller.empty_stack().await.is_err());
    assert_eq!(controller.state(), RunState::Failed);
    assert_eq!(recorder.topics(), vec!["start", "end:failed"]);
}

#[tokio::test]
async fn test_panicking_timer_fails_execution_end() {
    let options = RunOptions::new().console(Arc::new(PanickingConsole));
    let controller = run(
        "setTimeout(function() { print('late') }, 0)\nreturn 1",
        options.granularity(Granularity::Explicit),
    )
    .expect("Should load");

    assert_eq!(controller.empty_stack().await, Ok(Val::Num(1.0)));
    let ended = tokio::time::timeout(Duration::from_secs(1), controller.execution_end()).await;
    match ended {
        Ok(Err(RunError::Suboperation(err))) => {
            assert_eq!(err.code(), Some(codes::TASK_PANICKED))
        }
        other => panic!("Expected suboperation error, got {:?}", other),
    }
    assert_eq!(controller.active_operations(), 0);
    assert_eq!(controller.state(), RunState::Failed);
}

#[tokio::test]
async fn test_structured_runtime_error_keeps_code() {
    let (options, _) = quiet_options();
    let controller = run("return missing", options).expect("Should load");
    match controller.empty_stack().await {
        Err(RunError::Execution(err)) => {
            assert_eq!(err.code(), Some(codes::REFERENCE_ERROR));
        }
        other => panic!("Expected execution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_set_timeout_delays_execution_end_only() {
    let (options, console) = quiet_options();
    let controller = run(
        "setTimeout(function() { print('timer') }, 80)\nreturn 'main'",
        options,
    )
    .expect("Should load");

    let started = Instant::now();
    assert_eq!(controller.empty_stack().await, Ok(Val::Str("main".into())));
    assert!(started.elapsed() < Duration::from_millis(80));
    assert_eq!(controller.active_operations(), 1);

    controller.execution_end().await.expect("Run failed");
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(console.lines(), vec!["timer".to_string()]);
    assert_eq!(controller.state(), RunState::Completed);
}

#[tokio::test]
async fn test_failing_timer_fails_execution_end() {
    let (options, _) = quiet_options();
    let controller = run(
        "setTimeout(function() { throw 'late' }, 10)\nreturn 1",
        options,
    )
    .expect("Should load");

    assert_eq!(controller.empty_stack().await, Ok(Val::Num(1.0)));
    match controller.execution_end().await {
        Err(RunError::Suboperation(err)) => assert_eq!(err.message(), "late"),
        other => panic!("Expected suboperation error, got {:?}", other),
    }
    assert_eq!(controller.state(), RunState::Failed);
}

/* ===================== Pause / Stop ===================== */

#[tokio::test]
async fn test_pause_holds_run_until_resume() {
    let (options, _) = quiet_options();
    let controller = run("for (let i of range(3)) { }", options).expect("Should load");
    controller.pause();

    let started = Instant::now();
    let resumer = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        resumer.resume();
    });

    controller.execution_end().await.expect("Run failed");
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(controller.state(), RunState::Completed);
}

#[tokio::test]
async fn test_stop_mid_execution_ends_stopped() {
    let recorder = Recorder::default();
    let (options, console) = quiet_options();
    let controller = run(
        "while (true) { step(20); print('tick') }",
        recorder.attach(options.granularity(Granularity::Explicit)),
    )
    .expect("Should load");

    tokio::time::sleep(Duration::from_millis(70)).await;
    controller.stop();

    let started = Instant::now();
    assert_eq!(controller.execution_end().await, Ok(()));
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(controller.empty_stack().await, Ok(Val::Null));
    assert_eq!(controller.state(), RunState::Stopped);
    assert_eq!(recorder.topics().last().map(String::as_str), Some("end:stopped"));
    assert!(!console.lines().is_empty());
}

#[tokio::test]
async fn test_stop_cancels_long_delay_and_timers() {
    let (options, console) = quiet_options();
    let controller = run(
        "setTimeout(function() { print('never') }, 5000)\nstep(3600000)",
        options.granularity(Granularity::Explicit),
    )
    .expect("Should load");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = Instant::now();
    controller.stop();
    assert_eq!(controller.execution_end().await, Ok(()));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(console.lines().is_empty());
    assert_eq!(controller.state(), RunState::Stopped);
}

#[tokio::test]
async fn test_infinite_delay_waits_until_stopped() {
    let recorder = Recorder::default();
    let (options, console) = quiet_options();
    let controller = run(
        "step(1 / 0)\nprint('after')",
        recorder.attach(options.granularity(Granularity::Explicit)),
    )
    .expect("Should load");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(controller.state(), RunState::Running);
    controller.stop();

    assert_eq!(controller.execution_end().await, Ok(()));
    assert_eq!(controller.state(), RunState::Stopped);
    assert_eq!(recorder.topics(), vec!["start", "step", "end:stopped"]);
    assert!(console.lines().is_empty());
}

#[tokio::test]
async fn test_delay_beyond_duration_range_waits_until_stopped() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let source = r#"
        let ms = 1
        let i = 0
        while (i < 23) {
            ms = ms * 10
            i = i + 1
        }
        step(ms)
    "#;
    let controller = run(
        source,
        recorder.attach(options.granularity(Granularity::Explicit)),
    )
    .expect("Should load");

    tokio::time::sleep(Duration::from_millis(30)).await;
    controller.stop();

    let ended = tokio::time::timeout(Duration::from_secs(1), controller.execution_end()).await;
    assert_eq!(ended, Ok(Ok(())));
    assert_eq!(controller.state(), RunState::Stopped);
    assert_eq!(recorder.count("end"), 1);
}

#[tokio::test]
async fn test_stop_before_first_step() {
    let (options, console) = quiet_options();
    let controller = run("print('body')\nstep()\nprint('after')", options).expect("Should load");
    controller.stop();

    assert_eq!(controller.empty_stack().await, Ok(Val::Null));
    assert_eq!(controller.state(), RunState::Stopped);
    // The first statement runs before the first checkpoint
    assert_eq!(console.lines(), vec!["body".to_string()]);
}

#[tokio::test]
async fn test_stop_after_end_is_noop() {
    let (options, _) = quiet_options();
    let controller = run("return 1", options).expect("Should load");
    controller.execution_end().await.expect("Run failed");
    controller.stop();
    controller.stop();
    assert_eq!(controller.state(), RunState::Completed);
}

#[tokio::test]
async fn test_program_stop_inside_try() {
    let (options, console) = quiet_options();
    let controller = run(
        "try { stop() } catch (e) { print('caught') }\nprint('after')",
        options,
    )
    .expect("Should load");

    assert_eq!(controller.empty_stack().await, Ok(Val::Null));
    assert_eq!(controller.execution_end().await, Ok(()));
    assert_eq!(controller.state(), RunState::Stopped);
    assert!(console.lines().is_empty());
}

#[tokio::test]
async fn test_program_pause_is_resumed_by_controller() {
    let (options, console) = quiet_options();
    let controller = run("pause()\nstep()\nprint('resumed')", options).expect("Should load");

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(console.lines().is_empty());
    controller.resume();

    controller.execution_end().await.expect("Run failed");
    assert_eq!(console.lines(), vec!["resumed".to_string()]);
}

/* ===================== Options ===================== */

#[tokio::test]
async fn test_destroy_after_run_releases_listeners() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let controller = run("step()", recorder.attach(options)).expect("Should load");
    controller.execution_end().await.expect("Run failed");

    assert_eq!(controller.events().total_listeners(), 0);
    assert!(controller.events().is_destroyed());
    assert!(controller.context().stepper().is_destroyed());
}

#[tokio::test]
async fn test_keep_resources_when_destroy_after_run_disabled() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let controller = run("step()", recorder.attach(options.destroy_after_run(false)))
        .expect("Should load");
    controller.execution_end().await.expect("Run failed");

    assert_eq!(controller.events().total_listeners(), 3);
    assert!(!controller.context().stepper().is_destroyed());
}

#[test]
fn test_synchronous_run_settles_before_returning() {
    let recorder = Recorder::default();
    let (options, console) = quiet_options();
    let controller = run(
        "for (let i of range(3)) { print(i) }\nreturn 'done'",
        recorder.attach(options.synchronous(true).step_delay(Some(Duration::from_secs(10)))),
    )
    .expect("Should load");

    assert_eq!(controller.main_result(), Some(Ok(Val::Str("done".into()))));
    assert_eq!(controller.state(), RunState::Completed);
    assert_eq!(recorder.count("step"), 3);
    assert_eq!(console.lines(), vec!["0", "1", "2"]);
}

#[test]
fn test_async_run_without_runtime_fails() {
    let (options, _) = quiet_options();
    let controller = run("return 1", options).expect("Should load");
    match controller.main_result() {
        Some(Err(RunError::Execution(err))) => assert_eq!(err.code(), Some(codes::NO_RUNTIME)),
        other => panic!("Expected runtime error, got {:?}", other),
    }
    assert_eq!(controller.state(), RunState::Failed);
}

#[tokio::test]
async fn test_context_bindings_and_controller_object() {
    let (options, _) = quiet_options();
    let controller = run(
        "return [greeting + ' ' + user.name, controller.runId]",
        options.with_context(hashmap! {
            "greeting".to_string() => Val::Str("hi".into()),
            "user".to_string() => Val::from(serde_json::json!({"name": "ada"})),
        }),
    )
    .expect("Should load");

    let expected = Val::List(vec![
        Val::Str("hi ada".into()),
        Val::Str(controller.run_id().to_string()),
    ]);
    assert_eq!(controller.empty_stack().await, Ok(expected));
}

#[tokio::test]
async fn test_step_delay_default() {
    let (options, _) = quiet_options();
    let controller = run(
        "step()\nstep()",
        options
            .granularity(Granularity::Explicit)
            .step_delay(Some(Duration::from_millis(30))),
    )
    .expect("Should load");

    let started = Instant::now();
    controller.execution_end().await.expect("Run failed");
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn test_baseline_dialect_output_matches() {
    let source = r#"
        for (let word of ["a", "b"]) {
            for (let ch of word + "!") { print(ch) }
        }
    "#;

    let mut outputs = Vec::new();
    for baseline in [false, true] {
        let recorder = Recorder::default();
        let (options, console) = quiet_options();
        let controller = run(
            source,
            recorder.attach(options.transform_to_baseline_dialect(baseline)),
        )
        .expect("Should load");
        controller.execution_end().await.expect("Run failed");
        outputs.push((console.lines(), recorder.count("step")));
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0].1, 6);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let (a_options, a_console) = quiet_options();
    let (b_options, b_console) = quiet_options();
    let a = run(
        "let shared = 'a'\nfor (let i of range(3)) { step(5) }\nprint(shared)",
        a_options,
    )
    .expect("Should load");
    let b = run(
        "let shared = 'b'\nfor (let i of range(3)) { step(5) }\nprint(shared)",
        b_options,
    )
    .expect("Should load");

    let (ra, rb) = tokio::join!(a.execution_end(), b.execution_end());
    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(a_console.lines(), vec!["a".to_string()]);
    assert_eq!(b_console.lines(), vec!["b".to_string()]);
    assert_ne!(a.run_id(), b.run_id());
}

/* ===================== Load Errors ===================== */

#[test]
fn test_load_errors_emit_nothing() {
    let recorder = Recorder::default();
    let (options, _) = quiet_options();
    let result = run("let = ", recorder.attach(options));
    assert!(matches!(result, Err(LoadError::Parse(_))));

    let (options, _) = quiet_options();
    let result = run("break\ncontinue", recorder.attach(options));
    match result {
        Err(LoadError::Invalid(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("Expected validation errors, got {:?}", other),
    }
    assert!(recorder.topics().is_empty());
}

#[test]
fn test_run_state_serializes_lowercase() {
    assert_eq!(
        serde_json::to_value(Event::End(RunState::Stopped)).unwrap(),
        serde_json::json!({"topic": "end", "payload": "stopped"})
    );
}
