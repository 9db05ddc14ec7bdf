//! End-to-end relay flow against scriptable mock chains: discovery on the
//! source, persistence and finality gating in the supervisor, delivery and
//! acknowledgement on the destination.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use centralized_relay::chain::client::AccountInfo;
use centralized_relay::chain::cosmos::CosmosProvider;
use centralized_relay::config::{
    ChainConfig, ContractSet, EventSourceMode, GasAdjustment, GlobalConfig,
};
use centralized_relay::mock::{BroadcastScript, MockChain};
use centralized_relay::store::{MemoryStore, MessageStore};
use centralized_relay::supervisor::Supervisor;
use centralized_relay::types::NetworkId;

fn chain_config(nid: &str) -> ChainConfig {
    ChainConfig {
        nid: NetworkId::from(nid),
        chain_name: "mock".to_string(),
        chain_id: format!("{nid}-1"),
        rpc_url: "http://localhost:26657".to_string(),
        start_height: 0,
        contracts: ContractSet {
            xcall: format!("{nid}-xcall"),
            connection: format!("{nid}-conn"),
        },
        gas_prices: "0.025umock".parse().unwrap(),
        gas_adjustment: GasAdjustment::default(),
        default_gas: None,
        min_gas: 20_000,
        max_gas: 4_000_000,
        finality_block: 0,
        block_interval: Duration::from_millis(50),
        tx_confirmation_interval: Duration::from_millis(10),
        tx_wait_timeout: Duration::from_secs(5),
        denomination: "umock".to_string(),
        address: format!("{nid}-wallet"),
        event_source: EventSourceMode::Pull,
    }
}

fn global_config() -> GlobalConfig {
    GlobalConfig {
        max_retry: 2,
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::from_secs(1),
    }
}

/// A two-chain relay over mocks: `chainA` (source) and `chainB`
/// (destination). Seed the mocks and the store, then call `run`.
struct RelayFixture {
    source: Arc<MockChain>,
    destination: Arc<MockChain>,
    store: Arc<MemoryStore>,
    token: CancellationToken,
    source_finality: u64,
}

struct RunningRelay {
    token: CancellationToken,
    runner: tokio::task::JoinHandle<()>,
}

impl RelayFixture {
    fn new(source_finality: u64) -> Self {
        let destination = Arc::new(MockChain::new());

        destination.set_latest_height(100);
        destination.set_account(AccountInfo {
            account_number: 1,
            sequence: 100,
        });

        Self {
            source: Arc::new(MockChain::new()),
            destination,
            store: Arc::new(MemoryStore::new()),
            token: CancellationToken::new(),
            source_finality,
        }
    }

    fn run(&self) -> RunningRelay {
        let mut config_a = chain_config("chainA");
        config_a.finality_block = self.source_finality;

        let mut config_b = chain_config("chainB");
        config_b.block_interval = Duration::from_millis(100);

        let provider_a = Arc::new(
            CosmosProvider::new(config_a, self.source.clone(), self.token.child_token()).unwrap(),
        );
        let provider_b = Arc::new(
            CosmosProvider::new(config_b, self.destination.clone(), self.token.child_token())
                .unwrap(),
        );

        let mut supervisor =
            Supervisor::new(global_config(), self.store.clone(), self.token.clone());
        supervisor.add_provider(provider_a);
        supervisor.add_provider(provider_b);

        let runner = tokio::spawn(async move {
            supervisor.run().await.expect("supervisor failed");
        });

        RunningRelay {
            token: self.token.clone(),
            runner,
        }
    }
}

impl RunningRelay {
    async fn shutdown(self) {
        self.token.cancel();
        self.runner.await.unwrap();
    }
}

async fn wait_until<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }

        sleep(Duration::from_millis(20)).await;
    }

    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn relay_delivers_source_events_end_to_end() {
    let relay = RelayFixture::new(5);
    let src = NetworkId::from("chainA");

    // The destination records the receipt as soon as the delivery lands.
    relay.destination.acknowledge(&src, 7);

    relay.source.set_latest_height(50);
    relay.source.push_wasm_tx(
        45,
        "chainA-conn",
        &[("msg", "0x0102"), ("connSn", "7"), ("targetNetwork", "chainB")],
    );
    // The same event reported again at a later height must be deduplicated.
    relay.source.push_wasm_tx(
        46,
        "chainA-conn",
        &[("msg", "0x0102"), ("connSn", "7"), ("targetNetwork", "chainB")],
    );

    relay.store.set_cursor(&src, 40).await.unwrap();

    let running = relay.run();

    wait_until("message delivered and removed from store", || async {
        relay.store.messages().await.unwrap().is_empty()
            && !relay.destination.broadcasts().is_empty()
    })
    .await;

    // Exactly one delivery despite the duplicate event.
    let broadcasts = relay.destination.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].contract, "chainB-conn");

    // The source cursor advanced through the scanned heights.
    wait_until("cursor advanced", || async {
        relay.store.cursor(&src).await.unwrap() >= 45
    })
    .await;

    running.shutdown().await;
}

#[tokio::test]
async fn finality_delay_gates_dispatch() {
    let relay = RelayFixture::new(5);
    let src = NetworkId::from("chainA");

    relay.destination.acknowledge(&src, 3);

    relay.source.set_latest_height(50);
    relay.source.push_wasm_tx(
        48,
        "chainA-conn",
        &[("msg", "0xaa"), ("connSn", "3"), ("targetNetwork", "chainB")],
    );

    relay.store.set_cursor(&src, 40).await.unwrap();

    let running = relay.run();

    // The message is persisted but held back: 48 + 5 > 50.
    wait_until("message persisted", || async {
        !relay.store.messages().await.unwrap().is_empty()
    })
    .await;

    sleep(Duration::from_millis(500)).await;
    assert!(
        relay.destination.broadcasts().is_empty(),
        "message dispatched before the finality delay elapsed"
    );

    // Confirmations arrive on the source chain.
    relay.source.set_latest_height(53);

    wait_until("message delivered after finality", || async {
        relay.store.messages().await.unwrap().is_empty()
            && !relay.destination.broadcasts().is_empty()
    })
    .await;

    running.shutdown().await;
}

#[tokio::test]
async fn exhausted_retries_leave_a_permanent_failure_marker() {
    let relay = RelayFixture::new(0);
    let src = NetworkId::from("chainA");

    relay.source.set_latest_height(50);
    relay.source.push_wasm_tx(
        45,
        "chainA-conn",
        &[("msg", "0x0102"), ("connSn", "9"), ("targetNetwork", "chainB")],
    );

    relay.store.set_cursor(&src, 44).await.unwrap();

    // Every delivery attempt is rejected by the destination.
    for _ in 0..global_config().max_retry {
        relay
            .destination
            .script_broadcast(BroadcastScript::Code(13, "out of gas".to_string()));
    }

    let running = relay.run();

    wait_until("message dropped after exhausting retries", || async {
        relay.store.messages().await.unwrap().is_empty()
            && relay.store.failed_messages().await.len() == 1
    })
    .await;

    // Nothing was ever accepted by the destination chain.
    assert!(relay.destination.broadcasts().is_empty());

    running.shutdown().await;
}

#[tokio::test]
async fn persisted_messages_are_rescheduled_on_startup() {
    let relay = RelayFixture::new(0);
    let src = NetworkId::from("chainA");

    relay.source.set_latest_height(50);
    relay.destination.acknowledge(&src, 11);

    // A message left over from a previous run; no chain event backs it.
    let msg = centralized_relay::types::Message {
        src: src.clone(),
        dst: NetworkId::from("chainB"),
        sn: 11,
        req_id: 0,
        event_kind: centralized_relay::types::EventKind::EmitMessage,
        data: vec![0x0a],
        message_height: 30,
        retry_count: 0,
        last_tried_at: 0,
    };
    relay.store.put(&msg.key(), &msg).await.unwrap();
    relay.store.set_cursor(&src, 50).await.unwrap();

    let running = relay.run();

    wait_until("persisted message delivered", || async {
        relay.store.messages().await.unwrap().is_empty()
            && !relay.destination.broadcasts().is_empty()
    })
    .await;

    running.shutdown().await;
}
