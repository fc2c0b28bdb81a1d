//! End-to-end render tests through the Dispatcher
//!
//! These tests drive every binding kind through the public entry point:
//! - managed and native doubles registered in-process
//! - shell-script process engines (unix only)
//! - error propagation for missing engines, bad envelopes, timeouts and cancellation

use std::sync::Arc;
use std::time::{Duration, Instant};

use resampler_host::config::{DispatchConfig, HostConfig};
use resampler_host::engine::binding::ManagedModule;
use resampler_host::render::EnvelopePoint;
use resampler_host::testing::{native_echo_entry_points, EchoEngine};
use resampler_host::{
    BindingKind, CancelToken, Dispatcher, EngineError, EngineInput, EngineRegistry,
    InvocationCause, InvokeContext, RenderItem,
};

fn envelope() -> Vec<EnvelopePoint> {
    vec![
        EnvelopePoint::new(0.0, 0.0),
        EnvelopePoint::new(5.0, 100.0),
        EnvelopePoint::new(35.0, 100.0),
        EnvelopePoint::new(60.0, 100.0),
        EnvelopePoint::new(60.0, 0.0),
    ]
}

fn item(raw_file: &str, out_file: &str) -> RenderItem {
    RenderItem {
        raw_file: raw_file.to_string(),
        out_file: out_file.to_string(),
        note_num: 69,
        required_length: 500.0,
        pitch_data: vec![0, 0, 0, 10, 20],
        envelope: envelope(),
        ..RenderItem::default()
    }
}

fn in_process_dispatcher() -> Dispatcher {
    let registry = Arc::new(EngineRegistry::new());
    registry
        .catalog()
        .load(ManagedModule::from_engine::<EchoEngine>("managed://echo", "Resampler"))
        .unwrap();
    registry
        .link_native("native://echo", native_echo_entry_points())
        .unwrap();
    Dispatcher::new(registry, DispatchConfig::default())
}

#[test]
fn test_managed_render_returns_engine_bytes() {
    let dispatcher = in_process_dispatcher();
    let bytes = dispatcher
        .render("managed://echo", &item("voice/_a.wav", "out.wav"))
        .unwrap();
    assert_eq!(bytes, b"voice/_a.wav");
    assert_eq!(
        dispatcher.registry().resolve("managed://echo").unwrap().kind(),
        BindingKind::Managed
    );
}

#[test]
fn test_native_render_sees_built_input() {
    let dispatcher = in_process_dispatcher();
    let bytes = dispatcher
        .render("native://echo", &item("voice/_a.wav", "out.wav"))
        .unwrap();
    let echoed: EngineInput = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(echoed.input_wave_file, "voice/_a.wav");
    assert_eq!(echoed.note_string, "A4");
    assert_eq!(echoed.velocity, 100.0);
    assert_eq!(echoed.tempo, 120.0);
    assert_eq!(echoed.required_length, 500.0);
    assert_eq!(echoed.pitch_bend, vec![0, 0, 0, 10, 20]);
}

#[test]
fn test_unknown_engine_is_not_found() {
    let dispatcher = in_process_dispatcher();
    match dispatcher.render("/definitely/not/an/engine", &item("a.wav", "b.wav")) {
        Err(EngineError::EngineNotFound { location }) => {
            assert_eq!(location, "/definitely/not/an/engine")
        }
        other => panic!("Expected EngineNotFound, got {:?}", other),
    }
}

#[test]
fn test_bad_envelope_is_rejected_before_invocation() {
    let dispatcher = in_process_dispatcher();
    let mut bad = item("voice/_a.wav", "out.wav");
    bad.envelope.swap(1, 3);
    assert!(matches!(
        dispatcher.render("managed://echo", &bad),
        Err(EngineError::InvalidEnvelope { .. })
    ));

    let snapshot = dispatcher.telemetry().snapshot();
    assert_eq!(snapshot.failures, 1);
    assert!(!snapshot
        .recent
        .iter()
        .any(|event| matches!(event, resampler_host::telemetry::RenderEvent::RenderCompleted { .. })));
}

#[test]
fn test_concurrent_renders_share_one_descriptor() {
    let dispatcher = Arc::new(in_process_dispatcher());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::spawn(move || {
                dispatcher
                    .render("managed://echo", &item(&format!("n{}.wav", i), "out.wav"))
                    .unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), format!("n{}.wav", i).into_bytes());
    }
    assert_eq!(dispatcher.registry().discovery_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_render_async_runs_on_blocking_pool() {
    let dispatcher = Arc::new(in_process_dispatcher());
    let bytes = Arc::clone(&dispatcher)
        .render_async("managed://echo".to_string(), item("async.wav", "out.wav"))
        .await
        .unwrap();
    assert_eq!(bytes, b"async.wav");
}

#[cfg(unix)]
mod process {
    use super::*;
    use resampler_host::testing::write_script;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        dispatcher: Dispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(HostConfig::default())
        }

        fn with_config(config: HostConfig) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                dispatcher: Dispatcher::from_config(&config).unwrap(),
            }
        }

        fn script(&self, name: &str, body: &str) -> String {
            write_script(self.dir.path(), name, body)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        }

        fn item(&self) -> RenderItem {
            let raw = self.dir.path().join("raw.wav");
            fs::write(&raw, b"RIFF-ish").unwrap();
            let out = self.dir.path().join("out.wav");
            item(&raw.to_string_lossy(), &out.to_string_lossy())
        }
    }

    #[test]
    fn test_process_engine_output_file_is_returned() {
        let fixture = Fixture::new();
        let engine = fixture.script("copy", r#"cp "$1" "$2""#);

        let bytes = fixture.dispatcher.render(&engine, &fixture.item()).unwrap();
        assert_eq!(bytes, b"RIFF-ish");

        let info = fixture.dispatcher.describe(&engine).unwrap();
        assert_eq!(info.name, "copy");
        assert_eq!(
            fixture.dispatcher.registry().resolve(&engine).unwrap().kind(),
            BindingKind::Process
        );
    }

    #[test]
    fn test_process_engine_receives_tempo_and_pitch() {
        let fixture = Fixture::new();
        let engine = fixture.script("args", r#"printf '%s\n' "$@" > "$2""#);

        let bytes = fixture.dispatcher.render(&engine, &fixture.item()).unwrap();
        let lines: Vec<String> = String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines.len(), 13);
        assert_eq!(lines[2], "A4");
        assert_eq!(lines[11], "!120");
        assert_eq!(lines[12], "AA#2#AKAU");
    }

    #[test]
    fn test_non_zero_exit_carries_stderr() {
        let fixture = Fixture::new();
        let engine = fixture.script("fails", "echo 'bad sample' >&2\nexit 3");

        match fixture.dispatcher.render(&engine, &fixture.item()) {
            Err(EngineError::Invocation {
                location,
                cause: InvocationCause::ExitStatus { code, stderr },
            }) => {
                assert_eq!(location, engine);
                assert_eq!(code, Some(3));
                assert!(stderr.contains("bad sample"));
            }
            other => panic!("Expected ExitStatus failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_output_file_is_an_error() {
        let fixture = Fixture::new();
        let engine = fixture.script("silent", "exit 0");

        assert!(matches!(
            fixture.dispatcher.render(&engine, &fixture.item()),
            Err(EngineError::Invocation {
                cause: InvocationCause::MissingOutput { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_empty_output_file_is_an_error() {
        let fixture = Fixture::new();
        let engine = fixture.script("empty", r#": > "$2""#);

        assert!(matches!(
            fixture.dispatcher.render(&engine, &fixture.item()),
            Err(EngineError::Invocation {
                cause: InvocationCause::EmptyOutput,
                ..
            })
        ));
    }

    #[test]
    fn test_timeout_terminates_engine() {
        let fixture = Fixture::new();
        let engine = fixture.script("hangs", "exec sleep 5");
        let ctx = InvokeContext::new().with_timeout(Some(Duration::from_millis(100)));

        let started = Instant::now();
        let err = fixture
            .dispatcher
            .render_with(&engine, &fixture.item(), &ctx)
            .unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_cancellation_terminates_engine() {
        let fixture = Fixture::new();
        let engine = fixture.script("hangs", "exec sleep 5");
        let cancel = CancelToken::new();
        let ctx = InvokeContext::new().with_cancel(cancel.clone());

        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });
        let started = Instant::now();
        let result = fixture.dispatcher.render_with(&engine, &fixture.item(), &ctx);
        trigger.join().unwrap();

        assert!(matches!(
            result,
            Err(EngineError::Invocation {
                cause: InvocationCause::Cancelled,
                ..
            })
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_stale_output_is_not_returned() {
        let fixture = Fixture::new();
        let engine = fixture.script("silent", "exit 0");
        let item = fixture.item();
        fs::write(&item.out_file, b"previous render").unwrap();

        assert!(matches!(
            fixture.dispatcher.render(&engine, &item),
            Err(EngineError::Invocation {
                cause: InvocationCause::MissingOutput { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_background_child_does_not_hold_render_open() {
        let fixture = Fixture::new();
        let engine = fixture.script("forks", "cp \"$1\" \"$2\"\nsleep 3 &");
        let ctx = InvokeContext::new().with_timeout(Some(Duration::from_millis(300)));

        let started = Instant::now();
        let bytes = fixture
            .dispatcher
            .render_with(&engine, &fixture.item(), &ctx)
            .unwrap();
        assert_eq!(bytes, b"RIFF-ish");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_background_child_without_timeout_still_returns() {
        let fixture = Fixture::new();
        let engine = fixture.script("forks", "cp \"$1\" \"$2\"\nsleep 3 &");

        let started = Instant::now();
        let bytes = fixture
            .dispatcher
            .render_with(&engine, &fixture.item(), &InvokeContext::new())
            .unwrap();
        assert_eq!(bytes, b"RIFF-ish");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_queued_render_times_out_while_slot_is_busy() {
        let mut config = HostConfig::default();
        config.dispatch.max_concurrent_processes = 1;
        config.dispatch.process_timeout_ms = None;
        let fixture = Arc::new(Fixture::with_config(config));
        let busy = fixture.script("busy", "exec sleep 2");
        let item = fixture.item();

        let holder = {
            let fixture = Arc::clone(&fixture);
            let busy = busy.clone();
            let item = item.clone();
            std::thread::spawn(move || fixture.dispatcher.render(&busy, &item))
        };
        std::thread::sleep(Duration::from_millis(200));

        let ctx = InvokeContext::new().with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        let err = fixture.dispatcher.render_with(&busy, &item, &ctx).unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(1));

        // The busy engine never writes its output file.
        assert!(holder.join().unwrap().is_err());
    }
}
