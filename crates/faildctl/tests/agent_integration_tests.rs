//! End-to-end tests: controller client and fleet against real agent servers
//! backed by an in-memory host.

use anyhow::Result;
use faildctl::proto::Status;
use faildctl::{
    AgentClient, AgentConfig, AgentState, ClientConfig, ControlError, FaildRpc, Fleet, FleetConfig, StatsStore,
    TcpConnector,
};
use faildctl_agent::test_utils::FakeHost;
use faildctl_agent::{AgentServer, FaildService, ServiceConfig, TcpConnection, TcpState, Vip};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const VIP: &str = "198.51.100.1/32";

struct RunningAgent {
    addr: SocketAddr,
    host: Arc<FakeHost>,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningAgent {
    async fn start(iface: &str, host: FakeHost) -> Result<Self> {
        let host = Arc::new(host);
        let service = Arc::new(FaildService::new(ServiceConfig::new(iface), host.clone()));
        let server = AgentServer::bind("127.0.0.1:0", service).await?;
        let addr = server.local_addr()?;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));
        Ok(Self { addr, host, shutdown, task })
    }

    async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await??;
        Ok(())
    }
}

fn busy_host() -> FakeHost {
    let established = |local: &str, remote: &str| TcpConnection {
        local: local.parse().unwrap(),
        remote: remote.parse().unwrap(),
        state: TcpState::Established,
    };
    FakeHost::new()
        .with_stats_output("packets_in: 120\npackets_out: 80\nstatus ok\n")
        .with_connections(vec![
            established("198.51.100.1:443", "192.0.2.10:51000"),
            established("198.51.100.1:443", "192.0.2.11:51001"),
            established("192.0.2.5:22", "192.0.2.12:51002"),
        ])
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn test_client_operations_against_agent() -> Result<()> {
    let agent = RunningAgent::start("eth0", busy_host()).await?;
    let client = AgentClient::connect(&agent.addr.to_string(), ClientConfig::default()).await?;

    match client.init("198.51.100.1").await {
        Err(ControlError::Rejected(status)) => {
            assert_eq!(status, Status::invalid_argument("unable to parse VIP address"));
        }
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert!(agent.host.addresses("lo").is_empty());

    let status = client.init(VIP).await?;
    assert_eq!(status, Status::success());
    assert_eq!(agent.host.addresses("lo"), vec![VIP.parse::<Vip>()?]);

    let stats = client.get_statistics().await?;
    assert_eq!(stats["established_tcp_sessions"], 2);
    assert_eq!(stats["packets_in"], 120);
    assert_eq!(stats["packets_out"], 80);
    assert_eq!(stats.len(), 3);

    assert!(client.start().await?.is_success());
    assert!(client.stop().await?.is_success());
    let commands = agent.host.commands();
    assert!(commands.contains(&vec!["faild".to_string(), "-p".to_string(), "eth0".to_string()]));
    assert!(commands.contains(&vec!["faild".to_string(), "-u".to_string(), "eth0".to_string()]));

    drop(client);
    agent.stop().await
}

#[tokio::test]
async fn test_faild_failure_is_reported_as_execution_error() -> Result<()> {
    let agent = RunningAgent::start("eth0", FakeHost::new().with_failing_flag("-p")).await?;
    let client = AgentClient::connect(&agent.addr.to_string(), ClientConfig::default()).await?;

    match client.start().await {
        Err(ControlError::Rejected(status)) => assert_eq!(status.code, Status::EXECUTION_FAILED),
        other => panic!("Expected rejection, got {:?}", other),
    }

    drop(client);
    agent.stop().await
}

#[tokio::test]
async fn test_concurrent_requests_share_one_connection() -> Result<()> {
    let agent = RunningAgent::start("eth0", busy_host()).await?;
    let client = Arc::new(AgentClient::connect(&agent.addr.to_string(), ClientConfig::default()).await?);
    client.init(VIP).await?;

    let calls: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get_statistics().await })
        })
        .collect();
    for call in calls {
        assert_eq!(call.await??["established_tcp_sessions"], 2);
    }
    assert_eq!(client.pending_requests(), 0);

    drop(client);
    agent.stop().await
}

#[tokio::test]
async fn test_requests_fail_after_agent_shutdown() -> Result<()> {
    let agent = RunningAgent::start("eth0", FakeHost::new()).await?;
    let client = AgentClient::connect(&agent.addr.to_string(), ClientConfig::default()).await?;
    assert!(client.start().await?.is_success());

    agent.stop().await?;

    match client.get_statistics().await {
        Err(ControlError::Transport(_)) => {}
        other => panic!("Expected transport error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_connect_refused() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    match AgentClient::connect(&addr.to_string(), ClientConfig::default()).await {
        Err(ControlError::Connection(msg)) => assert!(msg.contains(&addr.to_string())),
        Err(other) => panic!("Expected connection error, got {:?}", other),
        Ok(_) => panic!("Expected connection error"),
    }
    Ok(())
}

#[tokio::test]
async fn test_fleet_bootstrap_and_broadcast() -> Result<()> {
    let agents = vec![
        RunningAgent::start("eth0", busy_host()).await?,
        RunningAgent::start("eth1", busy_host()).await?,
    ];

    let mut config = FleetConfig::default()
        .with_settle_interval(Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(20));
    for (i, agent) in agents.iter().enumerate() {
        config = config.with_agent(AgentConfig::new(format!("host_{}", i), agent.addr.to_string(), VIP));
    }
    config.validate()?;

    let store = StatsStore::new();
    let connector = Arc::new(TcpConnector::new(config.client_config()));
    let mut fleet = Fleet::register(&config, connector, store.clone());

    let report = fleet.bootstrap().await;
    assert!(report.is_success(), "{:?}", report);
    for agent in &agents {
        assert_eq!(agent.host.addresses("lo"), vec![VIP.parse::<Vip>()?]);
    }

    assert!(eventually(|| store.len() == 2).await);
    let dump = store.dump();
    assert_eq!(dump["host_0"].get("established_tcp_sessions"), Some(2));
    assert_eq!(dump["host_1"].get("packets_in"), Some(120));
    assert!(store.gauges().iter().any(|g| g.agent == "host_1" && g.metric == "packets_out" && g.value == 80));

    fleet.start_faild_all().await;
    let plugged = |agent: &RunningAgent, iface: &str| {
        agent
            .host
            .commands()
            .contains(&vec!["faild".to_string(), "-p".to_string(), iface.to_string()])
    };
    assert!(eventually(|| plugged(&agents[0], "eth0") && plugged(&agents[1], "eth1")).await);

    assert!(fleet.handles().all(|h| h.state() == AgentState::Polling));
    fleet.shutdown().await;

    for agent in agents {
        agent.stop().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_fleet_bootstrap_reports_unreachable_agent() -> Result<()> {
    let agent = RunningAgent::start("eth0", FakeHost::new()).await?;
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let dead_addr = listener.local_addr()?;
    drop(listener);

    let config = FleetConfig::default()
        .with_settle_interval(Duration::from_millis(10))
        .with_agent(AgentConfig::new("alive", agent.addr.to_string(), VIP))
        .with_agent(AgentConfig::new("dead", dead_addr.to_string(), VIP));
    let mut fleet = Fleet::register(&config, Arc::new(TcpConnector::default()), StatsStore::new());

    let report = fleet.bootstrap().await;

    assert!(!report.is_success());
    let failed: Vec<_> = report.failures().map(|(agent, _)| agent).collect();
    assert_eq!(failed, vec!["dead"]);

    fleet.shutdown().await;
    agent.stop().await
}
