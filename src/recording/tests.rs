//! Tests for the encode machine's status flags and frame hook

#[cfg(test)]
mod recording_tests {
    use crate::config::{EncodeConfig, RenderConfig};
    use crate::handoff::Handoff;
    use crate::machine::{MachineState, StateMachine, Worker};
    use crate::recording::{DrawingCaller, EncodeAction, EncodeMachine, EncodeState};
    use crate::render::EncoderSurfaceParams;
    use crate::testing::{SimEncoderFactory, SimGpu, SimHost, SimMuxerFactory};
    use crate::types::TextureId;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        gpu: Arc<SimGpu>,
        host: Arc<SimHost>,
        worker: Worker<EncodeMachine>,
        caller: DrawingCaller,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let gpu = Arc::new(SimGpu::new());
        let host = Arc::new(SimHost::new());
        let config = EncodeConfig {
            output_dir: dir.path().to_path_buf(),
            ..EncodeConfig::default()
        };

        let machine = EncodeMachine::new(
            gpu.clone(),
            Arc::new(SimEncoderFactory::new(gpu.clone())),
            Arc::new(SimMuxerFactory::new()),
            config,
            RenderConfig::default(),
            host.clone(),
        )
        .with_active_callback(host.active_callback());
        let status = machine.status();

        let worker = Worker::spawn(machine, host.clone()).unwrap();
        let caller = DrawingCaller::new(worker.mailbox(), status);

        Fixture {
            _dir: dir,
            gpu,
            host,
            worker,
            caller,
        }
    }

    fn params(gpu: &SimGpu) -> EncoderSurfaceParams {
        EncoderSurfaceParams {
            context: gpu.root_context(),
            overlay_texture: TextureId(900),
            fullscreen_texture: TextureId(901),
        }
    }

    #[test]
    fn test_drawing_caller_ignored_while_idle() {
        let f = fixture();
        f.caller.call();
        assert!(f.worker.flush(Duration::from_secs(1)));
        assert!(f.worker.state().is_idle());
        assert!(f.host.active_changes().is_empty());
    }

    #[test]
    fn test_active_edges_fire_once() {
        let f = fixture();
        let handoff = Arc::new(Handoff::new("encoder-params"));

        f.worker.send(EncodeAction::Start {
            params_handoff: handoff.clone(),
        });
        assert!(f.worker.flush(Duration::from_secs(1)));
        assert!(matches!(f.worker.state(), EncodeState::AwaitingContext(_)));

        handoff.put(params(&f.gpu));
        assert!(f
            .worker
            .wait_until(Duration::from_secs(1), |s| matches!(s, EncodeState::Recording(_))));

        f.caller.call();
        f.caller.call();
        f.worker.send(EncodeAction::Stop);
        f.worker.send(EncodeAction::Stop);
        assert!(f.worker.flush(Duration::from_secs(1)));

        assert!(matches!(f.worker.state(), EncodeState::Idle));
        assert_eq!(f.host.active_changes(), vec![true, false]);
    }

    #[test]
    fn test_stop_while_awaiting_context_withdraws_consumer() {
        let f = fixture();
        let handoff = Arc::new(Handoff::new("encoder-params"));

        f.worker.send(EncodeAction::Start {
            params_handoff: handoff.clone(),
        });
        f.worker.send(EncodeAction::Stop);
        assert!(f.worker.flush(Duration::from_secs(1)));

        assert!(!handoff.has_waiting_consumer());
        handoff.put(params(&f.gpu));
        assert!(handoff.has_pending_value());
        assert!(matches!(f.worker.state(), EncodeState::Idle));
    }
}
