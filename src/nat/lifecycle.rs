//! Background task that keeps one port mapping alive.
//!
//! Every cycle rediscovers gateways from scratch, maps the port on the first
//! one that accepts it and records the lease. Nothing is carried between
//! cycles except the cached local address and the last successful mapping,
//! which is also what gets deleted on shutdown.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::description::{ControlUrlResolver, DescriptionResolver};
use super::error::NatResult;
use super::local_addr::{LocalAddressResolver, RouteProbe};
use super::soap::{PortMappingClient, SoapClient};
use super::ssdp::{GatewayDiscovery, SsdpDiscoverer};
use super::types::{ActiveMapping, MappingRequest, Protocol};
use super::PortMapConfig;

/// Where the manager is in its current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperState {
    /// Nothing mapped yet, or the last cycle failed
    Idle,
    Discovering,
    Mapping,
    Active,
}

impl fmt::Display for MapperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MapperState::Idle => "idle",
            MapperState::Discovering => "discovering",
            MapperState::Mapping => "mapping",
            MapperState::Active => "active",
        };
        f.write_str(name)
    }
}

/// What the shutdown cleanup did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No mapping was ever established
    NothingRegistered,
    /// The lease had already run out, no request sent
    Lapsed,
    Removed,
    /// Delete was sent but refused or failed
    Failed,
}

/// Cycle counters
#[derive(Debug, Default)]
pub struct MapperStats {
    cycles: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl MapperStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Cycles that ran to an outcome
    pub fn completed(&self) -> u64 {
        self.successes() + self.failures()
    }

    pub fn summary(&self) -> String {
        let completed = self.completed();
        let rate = if completed > 0 {
            self.successes() as f64 / completed as f64 * 100.0
        } else {
            0.0
        };
        format!(
            "Port mapping cycles: {} started, {} succeeded, {} failed ({:.1}% success)",
            self.cycles(),
            self.successes(),
            self.failures(),
            rate
        )
    }
}

/// Port mapping manager with pluggable discovery, resolution and SOAP layers
pub struct PortMapper {
    config: PortMapConfig,
    discovery: Arc<dyn GatewayDiscovery>,
    resolver: Arc<dyn ControlUrlResolver>,
    client: Arc<dyn PortMappingClient>,
    local: Arc<dyn LocalAddressResolver>,
}

impl PortMapper {
    /// Manager using SSDP, HTTP and SOAP with the default configuration
    pub fn new() -> NatResult<Self> {
        Self::with_config(PortMapConfig::default())
    }

    pub fn with_config(config: PortMapConfig) -> NatResult<Self> {
        config.validate()?;
        let discovery = Arc::new(SsdpDiscoverer::new(&config));
        let resolver = Arc::new(DescriptionResolver::new(&config)?);
        let client = Arc::new(SoapClient::new(&config));
        let local = Arc::new(RouteProbe::new(config.probe_addr));

        Ok(Self::with_components(config, discovery, resolver, client, local))
    }

    pub fn with_components(
        config: PortMapConfig,
        discovery: Arc<dyn GatewayDiscovery>,
        resolver: Arc<dyn ControlUrlResolver>,
        client: Arc<dyn PortMappingClient>,
        local: Arc<dyn LocalAddressResolver>,
    ) -> Self {
        Self { config, discovery, resolver, client, local }
    }

    /// Spawn the renewal task for `protocol`/`port` and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, protocol: Protocol, port: u16) -> PortMapperHandle {
        let registered = Arc::new(Mutex::new(None));
        let stats = Arc::new(MapperStats::default());
        let (state_tx, state_rx) = watch::channel(MapperState::Idle);
        let client = self.client.clone();
        let cleanup_timeout = self.config.http_timeout;

        let worker = Worker {
            mapper: self,
            protocol,
            port,
            local_ip: None,
            registered: registered.clone(),
            state: state_tx,
            stats: stats.clone(),
        };

        info!("Keeping {} port {} forwarded", protocol, port);
        let task = tokio::spawn(worker.run());

        PortMapperHandle {
            task: Some(task),
            registered,
            client,
            cleanup_timeout,
            state: state_rx,
            stats,
        }
    }
}

struct Worker {
    mapper: PortMapper,
    protocol: Protocol,
    port: u16,
    local_ip: Option<IpAddr>,
    registered: Arc<Mutex<Option<ActiveMapping>>>,
    state: watch::Sender<MapperState>,
    stats: Arc<MapperStats>,
}

impl Worker {
    async fn run(mut self) {
        // Cycles start a fixed interval apart, however long each one takes
        let mut schedule = interval(self.mapper.config.renew_interval);
        schedule.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            schedule.tick().await;
            if !self.run_cycle().await {
                self.set_state(MapperState::Idle);
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn set_state(&self, state: MapperState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("{} port {}: {} -> {}", self.protocol, self.port, previous, state);
        }
    }

    async fn local_ip(&mut self) -> NatResult<IpAddr> {
        if let Some(ip) = self.local_ip {
            return Ok(ip);
        }
        let ip = self.mapper.local.local_address().await?;
        info!("Local address for port mappings: {}", ip);
        self.local_ip = Some(ip);
        Ok(ip)
    }

    /// One discovery + mapping pass. `true` if a gateway accepted the mapping.
    async fn run_cycle(&mut self) -> bool {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        self.set_state(MapperState::Discovering);

        let locations = match self.mapper.discovery.discover().await {
            Ok(locations) => locations,
            Err(e) => {
                warn!("Gateway discovery for {} port {} failed: {}", self.protocol, self.port, e);
                return false;
            }
        };

        if locations.is_empty() {
            warn!("No gateway answered discovery for {} port {}", self.protocol, self.port);
            return false;
        }

        for location in &locations {
            let endpoint = match self.mapper.resolver.resolve(location).await {
                Ok(Some(endpoint)) => endpoint,
                Ok(None) => {
                    debug!("{} offers no WAN IP connection, skipping", location);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping gateway {}: {}", location, e);
                    continue;
                }
            };

            let local_ip = match self.local_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    error!("Aborting mapping cycle for {} port {}: {}", self.protocol, self.port, e);
                    return false;
                }
            };

            self.set_state(MapperState::Mapping);
            let config = &self.mapper.config;
            let request = MappingRequest::same_port(
                &config.description_prefix,
                self.protocol,
                self.port,
                local_ip,
                config.lease_duration,
            );

            match self.mapper.client.add_mapping(&endpoint, &request).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(
                        "AddPortMapping for {} port {} via {} failed: {}",
                        self.protocol, self.port, endpoint.control_url, e
                    );
                    continue;
                }
            }

            // Lease runs from the gateway's acceptance
            let mut active = ActiveMapping::new(endpoint, request, None);
            active.external_ip = match self.mapper.client.external_ip(&active.endpoint).await {
                Ok(ip) => ip,
                Err(e) => {
                    debug!("No external address from {}: {}", active.endpoint.control_url, e);
                    None
                }
            };

            match active.external_ip {
                Some(ip) => info!(
                    "{} port {} reachable at {}:{} until {}",
                    self.protocol, self.port, ip, self.port, active.expires_at_utc
                ),
                None => info!(
                    "{} port {} forwarded until {}",
                    self.protocol, self.port, active.expires_at_utc
                ),
            }

            // Latest success replaces whatever cleanup was registered before
            *self.registered.lock() = Some(active);
            self.stats.successes.fetch_add(1, Ordering::Relaxed);
            self.set_state(MapperState::Active);
            return true;
        }

        warn!(
            "None of {} gateway(s) mapped {} port {}",
            locations.len(),
            self.protocol,
            self.port
        );
        false
    }
}

/// Owner of a running manager. Shut it down to release the mapping.
pub struct PortMapperHandle {
    task: Option<JoinHandle<()>>,
    registered: Arc<Mutex<Option<ActiveMapping>>>,
    client: Arc<dyn PortMappingClient>,
    cleanup_timeout: Duration,
    state: watch::Receiver<MapperState>,
    stats: Arc<MapperStats>,
}

impl PortMapperHandle {
    pub fn state(&self) -> MapperState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<MapperState> {
        self.state.clone()
    }

    /// Snapshot of the mapping the cleanup would remove
    pub fn active_mapping(&self) -> Option<ActiveMapping> {
        self.registered.lock().clone()
    }

    pub fn stats(&self) -> &MapperStats {
        &self.stats
    }

    /// Stop renewing and remove the mapping if its lease is still running.
    pub async fn shutdown(mut self) -> CleanupOutcome {
        if let Some(task) = self.task.take() {
            task.abort();
            // Wait for the abort so no cycle can register a mapping after this
            let _ = task.await;
        }

        let registered = self.registered.lock().take();
        let outcome = cleanup(self.client.as_ref(), registered).await;
        info!("Port mapper stopped ({:?}). {}", outcome, self.stats.summary());
        outcome
    }
}

impl Drop for PortMapperHandle {
    /// Best-effort cleanup when `shutdown` was never called. Blocks until the
    /// delete finishes or `http_timeout` passes.
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let Some(active) = self.registered.lock().take() else {
            return;
        };

        debug!("Port mapper dropped without shutdown, removing mapping");
        let client = self.client.clone();
        let limit = self.cleanup_timeout;
        let protocol = active.request.protocol;
        let port = active.request.external_port;
        let removal = async move {
            if timeout(limit, cleanup(client.as_ref(), Some(active))).await.is_err() {
                warn!("Removing {} port {} timed out after {:?}", protocol, port, limit);
            }
        };

        match Handle::try_current() {
            Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| runtime.block_on(removal));
            }
            // Current-thread runtime or none at all: the calling thread cannot
            // drive I/O here, so run the delete on a private runtime.
            _ => {
                let helper = std::thread::spawn(move || {
                    match Builder::new_current_thread().enable_all().build() {
                        Ok(runtime) => runtime.block_on(removal),
                        Err(e) => warn!("No runtime to remove {} port {}: {}", protocol, port, e),
                    }
                });
                if helper.join().is_err() {
                    error!("Port mapping cleanup thread panicked");
                }
            }
        }
    }
}

async fn cleanup(client: &dyn PortMappingClient, registered: Option<ActiveMapping>) -> CleanupOutcome {
    let Some(active) = registered else {
        return CleanupOutcome::NothingRegistered;
    };

    if !active.is_live_at(Instant::now()) {
        debug!(
            "{} port {} lease already expired, nothing to remove",
            active.request.protocol, active.request.external_port
        );
        return CleanupOutcome::Lapsed;
    }

    match client
        .delete_mapping(&active.endpoint, active.request.protocol, active.request.external_port)
        .await
    {
        Ok(true) => CleanupOutcome::Removed,
        Ok(false) => CleanupOutcome::Failed,
        Err(e) => {
            warn!(
                "Could not remove {} port {} from {}: {}",
                active.request.protocol, active.request.external_port, active.endpoint.control_url, e
            );
            CleanupOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::error::NatError;
    use crate::nat::types::ControlEndpoint;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct FakeDiscovery {
        locations: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GatewayDiscovery for FakeDiscovery {
        async fn discover(&self) -> NatResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.locations.clone())
        }
    }

    /// Answers with one gateway after `delay`, noting when each call began
    struct SlowDiscovery {
        delay: Duration,
        started: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl GatewayDiscovery for SlowDiscovery {
        async fn discover(&self) -> NatResult<Vec<String>> {
            self.started.lock().push(Instant::now());
            sleep(self.delay).await;
            Ok(vec!["http://a/desc.xml".to_string()])
        }
    }

    /// Maps `http://<name>/desc.xml` to an endpoint at `http://<name>/ctl`,
    /// unless the name is listed as lacking the service.
    struct FakeResolver {
        without_service: HashSet<String>,
    }

    #[async_trait]
    impl ControlUrlResolver for FakeResolver {
        async fn resolve(&self, location: &str) -> NatResult<Option<ControlEndpoint>> {
            if self.without_service.contains(location) {
                return Ok(None);
            }
            Ok(Some(ControlEndpoint {
                control_url: location.replace("/desc.xml", "/ctl"),
                host: "fake".to_string(),
                port: 80,
            }))
        }
    }

    #[derive(Default)]
    struct FakeClient {
        refusing: HashSet<String>,
        adds: Mutex<Vec<String>>,
        deletes: Mutex<Vec<(String, Protocol, u16)>>,
    }

    #[async_trait]
    impl PortMappingClient for FakeClient {
        async fn add_mapping(&self, endpoint: &ControlEndpoint, _request: &MappingRequest) -> NatResult<bool> {
            self.adds.lock().push(endpoint.control_url.clone());
            Ok(!self.refusing.contains(&endpoint.control_url))
        }

        async fn delete_mapping(
            &self,
            endpoint: &ControlEndpoint,
            protocol: Protocol,
            external_port: u16,
        ) -> NatResult<bool> {
            self.deletes.lock().push((endpoint.control_url.clone(), protocol, external_port));
            Ok(true)
        }
    }

    struct FixedAddress(Option<IpAddr>);

    #[async_trait]
    impl LocalAddressResolver for FixedAddress {
        async fn local_address(&self) -> NatResult<IpAddr> {
            self.0.ok_or_else(|| NatError::LocalAddress("unplugged".to_string()))
        }
    }

    fn config(lease: Duration) -> PortMapConfig {
        PortMapConfig {
            lease_duration: lease,
            renew_interval: Duration::from_secs(600),
            ..PortMapConfig::default()
        }
    }

    fn mapper(
        config: PortMapConfig,
        discovery: Arc<FakeDiscovery>,
        resolver: FakeResolver,
        client: Arc<FakeClient>,
        local: Option<IpAddr>,
    ) -> PortMapper {
        PortMapper::with_components(
            config,
            discovery,
            Arc::new(resolver),
            client,
            Arc::new(FixedAddress(local)),
        )
    }

    fn discovery(locations: &[&str]) -> Arc<FakeDiscovery> {
        Arc::new(FakeDiscovery {
            locations: locations.iter().map(|l| l.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn lan_ip() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
    }

    async fn wait_completed(handle: &PortMapperHandle, cycles: u64) {
        while handle.stats().completed() < cycles {
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_gateway_falls_through_to_next() {
        let client = Arc::new(FakeClient {
            refusing: HashSet::from(["http://a/ctl".to_string()]),
            ..FakeClient::default()
        });
        let handle = mapper(
            config(Duration::from_secs(600)),
            discovery(&["http://a/desc.xml", "http://b/desc.xml"]),
            FakeResolver { without_service: HashSet::new() },
            client.clone(),
            lan_ip(),
        )
        .start(Protocol::Tcp, 4000);

        let mut state = handle.subscribe();
        state.wait_for(|s| *s == MapperState::Active).await.unwrap();

        let active = handle.active_mapping().unwrap();
        assert_eq!(active.endpoint.control_url, "http://b/ctl");
        assert_eq!(active.request.internal_ip, lan_ip().unwrap());
        assert_eq!(*client.adds.lock(), vec!["http://a/ctl", "http://b/ctl"]);

        assert_eq!(handle.shutdown().await, CleanupOutcome::Removed);
        assert_eq!(
            *client.deletes.lock(),
            vec![("http://b/ctl".to_string(), Protocol::Tcp, 4000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_without_service_is_skipped() {
        let client = Arc::new(FakeClient::default());
        let handle = mapper(
            config(Duration::from_secs(600)),
            discovery(&["http://a/desc.xml", "http://b/desc.xml"]),
            FakeResolver { without_service: HashSet::from(["http://a/desc.xml".to_string()]) },
            client.clone(),
            lan_ip(),
        )
        .start(Protocol::Udp, 51413);

        handle.subscribe().wait_for(|s| *s == MapperState::Active).await.unwrap();
        assert_eq!(*client.adds.lock(), vec!["http://b/ctl"]);
        assert_eq!(handle.stats().successes(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delete_after_lease_lapsed() {
        let client = Arc::new(FakeClient::default());
        let cfg = PortMapConfig {
            lease_duration: Duration::from_secs(1),
            renew_interval: Duration::from_secs(3600),
            ..PortMapConfig::default()
        };
        let handle = mapper(
            cfg,
            discovery(&["http://a/desc.xml"]),
            FakeResolver { without_service: HashSet::new() },
            client.clone(),
            lan_ip(),
        )
        .start(Protocol::Tcp, 4000);

        handle.subscribe().wait_for(|s| *s == MapperState::Active).await.unwrap();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(handle.shutdown().await, CleanupOutcome::Lapsed);
        assert!(client.deletes.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_discovery_retries_next_cycle() {
        let client = Arc::new(FakeClient::default());
        let discovery = discovery(&[]);
        let handle = mapper(
            config(Duration::from_secs(600)),
            discovery.clone(),
            FakeResolver { without_service: HashSet::new() },
            client.clone(),
            lan_ip(),
        )
        .start(Protocol::Tcp, 4000);

        wait_completed(&handle, 1).await;
        assert_eq!(handle.state(), MapperState::Idle);
        assert_eq!(handle.stats().failures(), 1);

        sleep(Duration::from_secs(601)).await;
        wait_completed(&handle, 2).await;
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);

        assert_eq!(handle.shutdown().await, CleanupOutcome::NothingRegistered);
        assert!(client.adds.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_address_failure_aborts_cycle() {
        let client = Arc::new(FakeClient::default());
        let handle = mapper(
            config(Duration::from_secs(600)),
            discovery(&["http://a/desc.xml", "http://b/desc.xml"]),
            FakeResolver { without_service: HashSet::new() },
            client.clone(),
            None,
        )
        .start(Protocol::Tcp, 4000);

        wait_completed(&handle, 1).await;
        assert_eq!(handle.state(), MapperState::Idle);
        assert!(client.adds.lock().is_empty());
        assert_eq!(handle.shutdown().await, CleanupOutcome::NothingRegistered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_rediscovers_every_interval() {
        let client = Arc::new(FakeClient::default());
        let discovery = discovery(&["http://a/desc.xml"]);
        let handle = mapper(
            config(Duration::from_secs(600)),
            discovery.clone(),
            FakeResolver { without_service: HashSet::new() },
            client.clone(),
            lan_ip(),
        )
        .start(Protocol::Tcp, 4000);

        wait_completed(&handle, 1).await;
        let first = handle.active_mapping().unwrap().expires_at;

        sleep(Duration::from_secs(601)).await;
        wait_completed(&handle, 2).await;
        let second = handle.active_mapping().unwrap().expires_at;

        assert!(second > first);
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.adds.lock().len(), 2);

        // Only the latest registration is cleaned up, once
        assert_eq!(handle.shutdown().await, CleanupOutcome::Removed);
        assert_eq!(client.deletes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_start_one_interval_apart() {
        let discovery = Arc::new(SlowDiscovery {
            delay: Duration::from_secs(5),
            started: Mutex::new(Vec::new()),
        });
        let handle = PortMapper::with_components(
            config(Duration::from_secs(600)),
            discovery.clone(),
            Arc::new(FakeResolver { without_service: HashSet::new() }),
            Arc::new(FakeClient::default()),
            Arc::new(FixedAddress(lan_ip())),
        )
        .start(Protocol::Tcp, 4000);

        wait_completed(&handle, 2).await;

        // Time spent inside a cycle does not push the next one back
        let started = discovery.started.lock().clone();
        let gap = started[1] - started[0];
        assert!(gap >= Duration::from_secs(600));
        assert!(gap < Duration::from_secs(601));
        handle.shutdown().await;
    }

    #[test]
    fn test_drop_removes_mapping_before_runtime_exits() {
        let client = Arc::new(FakeClient::default());
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();

        runtime.block_on(async {
            let handle = mapper(
                config(Duration::from_secs(600)),
                discovery(&["http://a/desc.xml"]),
                FakeResolver { without_service: HashSet::new() },
                client.clone(),
                lan_ip(),
            )
            .start(Protocol::Tcp, 4000);

            handle.subscribe().wait_for(|s| *s == MapperState::Active).await.unwrap();
            drop(handle);
        });
        drop(runtime);

        assert_eq!(
            *client.deletes.lock(),
            vec![("http://a/ctl".to_string(), Protocol::Tcp, 4000)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_on_multi_thread_runtime_removes_mapping() {
        let client = Arc::new(FakeClient::default());
        let handle = mapper(
            config(Duration::from_secs(600)),
            discovery(&["http://a/desc.xml"]),
            FakeResolver { without_service: HashSet::new() },
            client.clone(),
            lan_ip(),
        )
        .start(Protocol::Udp, 51413);

        handle.subscribe().wait_for(|s| *s == MapperState::Active).await.unwrap();
        drop(handle);

        assert_eq!(
            *client.deletes.lock(),
            vec![("http://a/ctl".to_string(), Protocol::Udp, 51413)]
        );
    }

    #[test]
    fn test_drop_without_mapping_sends_nothing() {
        let client = Arc::new(FakeClient::default());
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();

        runtime.block_on(async {
            let handle = mapper(
                config(Duration::from_secs(600)),
                discovery(&[]),
                FakeResolver { without_service: HashSet::new() },
                client.clone(),
                lan_ip(),
            )
            .start(Protocol::Tcp, 4000);

            wait_completed(&handle, 1).await;
            drop(handle);
        });

        assert!(client.deletes.lock().is_empty());
    }

    #[test]
    fn test_stats_summary() {
        let stats = MapperStats::default();
        stats.cycles.store(4, Ordering::Relaxed);
        stats.successes.store(3, Ordering::Relaxed);
        stats.failures.store(1, Ordering::Relaxed);
        assert_eq!(
            stats.summary(),
            "Port mapping cycles: 4 started, 3 succeeded, 1 failed (75.0% success)"
        );
    }
}
