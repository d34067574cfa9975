//! Property tests for lifecycle flag invariants
//!
//! Arbitrary sequences of user operations, connector failures and status
//! events must never produce an inconsistent set of flags.


use nats_link::config::OptionsUpdate;
use nats_link::provider::{StatusFlags, StatusMonitor};
use nats_link::transport::{StatusEvent, StatusKind};
use proptest::prelude::*;
use test_helpers::Harness;

#[derive(Debug, Clone)]
enum Step {
    Connect,
    Reconnect,
    Close,
    Update(bool),
    FailConnects(bool),
    Event(StatusKind),
}

fn status_kind() -> impl Strategy<Value = StatusKind> {
    prop_oneof![
        Just(StatusKind::Disconnect),
        Just(StatusKind::Reconnecting),
        Just(StatusKind::Reconnect),
        Just(StatusKind::Update),
        Just(StatusKind::SlowConsumer),
        Just(StatusKind::Error),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Connect),
        1 => Just(Step::Reconnect),
        2 => Just(Step::Close),
        1 => any::<bool>().prop_map(Step::Update),
        1 => any::<bool>().prop_map(Step::FailConnects),
        4 => status_kind().prop_map(Step::Event),
    ]
}

fn open_flags() -> impl Strategy<Value = StatusFlags> {
    prop_oneof![
        Just(StatusFlags {
            closed: false,
            connecting: false,
            reconnecting: false,
            connected: true,
        }),
        Just(StatusFlags {
            closed: false,
            connecting: false,
            reconnecting: true,
            connected: false,
        }),
        Just(StatusFlags {
            closed: false,
            connecting: false,
            reconnecting: false,
            connected: false,
        }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_transition_preserves_consistency(flags in open_flags(), kind in status_kind()) {
        let (next, _) = StatusMonitor::transition(&flags, &StatusEvent::new(kind, ""));
        prop_assert!(next.is_consistent(), "{flags:?} -> {next:?}");
        prop_assert_eq!(next.closed, flags.closed);
    }

    #[test]
    fn prop_flags_stay_consistent(steps in proptest::collection::vec(step(), 1..24)) {
        runtime().block_on(async {
            let harness = Harness::manual();

            for step in steps {
                match &step {
                    Step::Connect => harness.manager.connect().await,
                    Step::Reconnect => harness.manager.reconnect().await,
                    Step::Close => harness.manager.close().await,
                    Step::Update(no_echo) => {
                        harness.manager.update(OptionsUpdate::new().no_echo(*no_echo)).await
                    }
                    Step::FailConnects(fail) => harness.connector.set_should_fail(*fail),
                    Step::Event(kind) => {
                        if let Some(connection) = harness.connector.latest_connection() {
                            connection.push_status(kind.clone());
                        }
                        tokio::task::yield_now().await;
                    }
                }

                let flags = harness.manager.flags();
                assert!(flags.is_consistent(), "Inconsistent flags after {step:?}: {flags:?}");
            }

            // Closing twice leaves the same state and emits nothing new
            harness.manager.close().await;
            let closed = harness.manager.flags();
            let notifications = harness.observer.notifications().len();
            harness.manager.close().await;

            assert_eq!(closed, StatusFlags::initial());
            assert_eq!(harness.manager.flags(), closed);
            assert_eq!(harness.observer.notifications().len(), notifications);
        });
    }
}
