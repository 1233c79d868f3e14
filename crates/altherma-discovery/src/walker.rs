//! Resource tree discovery
//!
//! The adapter does not publish its resource tree. Discovery probes the
//! numbered top-level groups `0, 1, 2, ...` until one answers with anything
//! other than 2000, then walks each group's `UnitProfile` document. The
//! profile encodes navigable names as JSON *values*: a scalar names one more
//! path segment, a list repeats the current path for each element, and an
//! object appends each key. Every visited path is probed at `<path>/la`; a
//! found resource below the group root becomes a channel.

use altherma_core::document::{parse_embedded, scalar_text, Document, Node};
use altherma_core::{Channel, ChannelGroup, ChannelModel, ModelError, PathError, ResourcePath};
use altherma_m2m::{probe_latest, Endpoint, Transport, TransportError};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Upper bound on the top-level index scan
///
/// The adapter terminates the scan with a not-found code; the bound only
/// matters for a device that never does.
pub const DEFAULT_MAX_GROUPS: u32 = 256;

/// Well-known container holding a group's profile document
pub const UNIT_PROFILE: &str = "UnitProfile";

/// Separator between a label's namespace and the group name
const LABEL_NAMESPACE_SEPARATOR: char = '/';

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Connection failed: {0}")]
    Connection(#[source] TransportError),
    #[error("Invalid resource path: {0}")]
    Path(#[from] PathError),
    #[error("Discovered channels are inconsistent: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Highest number of top-level groups probed
    pub max_groups: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_groups: DEFAULT_MAX_GROUPS,
        }
    }
}

/// Connect, discover every group, and disconnect
///
/// The connection is released on every path out of this function, including
/// a failed connect.
pub async fn discover<T>(
    transport: &mut T,
    endpoint: &Endpoint,
    config: &DiscoveryConfig,
) -> Result<ChannelModel, DiscoveryError>
where
    T: Transport + ?Sized,
{
    info!(endpoint = %endpoint, "Starting resource discovery");
    let result = match transport.connect(endpoint).await {
        Ok(()) => scan_groups(transport, config).await,
        Err(e) => Err(DiscoveryError::Connection(e)),
    };
    transport.disconnect().await;

    let model = ChannelModel::new(result?)?;
    info!(
        groups = model.groups().len(),
        channels = model.len(),
        "Resource discovery complete"
    );
    Ok(model)
}

/// Probe top-level groups on an open connection and walk each one
pub async fn scan_groups<T>(transport: &mut T, config: &DiscoveryConfig) -> Result<Vec<ChannelGroup>, DiscoveryError>
where
    T: Transport + ?Sized,
{
    let mut groups = Vec::new();
    let mut names = HashSet::new();
    let mut index = 0;

    loop {
        if index >= config.max_groups {
            warn!(max_groups = config.max_groups, "Group scan hit its limit without a terminating response");
            break;
        }

        let root = ResourcePath::group(index);
        let response = match transport.query(&root).await {
            Ok(response) => response,
            Err(e) if e.is_connection_fault() => return Err(DiscoveryError::Connection(e)),
            Err(e) => {
                warn!(index = index, error = %e, "Group probe failed, ending scan");
                break;
            }
        };

        if !response.is_found() {
            debug!(index = index, rsc = response.code, "No more groups");
            break;
        }

        let mut name = group_name(index, response.label());
        if !names.insert(name.clone()) {
            let unique = format!("{}-{}", name, index);
            debug!(index = index, name = %name, unique = %unique, "Group name already taken");
            names.insert(unique.clone());
            name = unique;
        }

        let mut group = ChannelGroup::new(index, name);
        group.channels = walk_group(transport, &root).await?;
        info!(
            group = %group.id,
            index = index,
            channels = group.channels.len(),
            "Discovered group"
        );
        groups.push(group);
        index += 1;
    }

    Ok(groups)
}

/// Group name from a container label like `function/SpaceHeating`
///
/// Falls back to the numeric index when the label is absent, not a
/// primitive, or empty once the namespace prefix is stripped.
pub fn group_name(index: u32, label: Option<&Document>) -> String {
    let Some(text) = label.and_then(scalar_text) else {
        return index.to_string();
    };
    let name = match text.split_once(LABEL_NAMESPACE_SEPARATOR) {
        Some((_, rest)) => rest,
        None => text.as_str(),
    };
    if name.is_empty() {
        index.to_string()
    } else {
        name.to_string()
    }
}

async fn walk_group<T>(transport: &mut T, root: &ResourcePath) -> Result<Vec<Channel>, DiscoveryError>
where
    T: Transport + ?Sized,
{
    let profile = match fetch_profile(transport, &root.child(UNIT_PROFILE)?).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return Ok(Vec::new()),
        Err(e) if e.is_connection_fault() => return Err(DiscoveryError::Connection(e)),
        Err(e) => {
            warn!(group = %root, error = %e, "Failed to fetch unit profile");
            return Ok(Vec::new());
        }
    };
    trace!(group = %root, profile = %profile, "Unit profile");

    let mut walker = Walker {
        transport,
        channels: Vec::new(),
        registered: HashSet::new(),
        pruned: 0,
    };
    if let Branch::Aborted(e) = walker.walk(&profile, root.clone()).await {
        return Err(DiscoveryError::Connection(e));
    }
    if walker.pruned > 0 {
        debug!(group = %root, pruned = walker.pruned, "Some branches were pruned");
    }
    Ok(walker.channels)
}

async fn fetch_profile<T>(transport: &mut T, path: &ResourcePath) -> Result<Option<Document>, TransportError>
where
    T: Transport + ?Sized,
{
    let response = probe_latest(transport, path).await?;
    if !response.is_found() {
        warn!(path = %path, rsc = response.code, "Group has no unit profile");
        return Ok(None);
    }
    let Some(content) = response.content() else {
        warn!(path = %path, "Unit profile response carries no content");
        return Ok(None);
    };
    match parse_embedded(content) {
        Ok(profile) => Ok(Some(profile)),
        Err(e) => {
            warn!(path = %path, error = %e, "Unit profile is not a valid document");
            Ok(None)
        }
    }
}

/// How walking one branch ended
enum Branch {
    Walked,
    /// Probe failed; nothing below this point was visited
    Pruned,
    /// Connection lost; discovery cannot continue
    Aborted(TransportError),
}

struct Walker<'t, T: ?Sized> {
    transport: &'t mut T,
    channels: Vec<Channel>,
    registered: HashSet<ResourcePath>,
    pruned: usize,
}

impl<'t, T> Walker<'t, T>
where
    T: Transport + ?Sized,
{
    fn walk<'a>(&'a mut self, node: &'a Document, path: ResourcePath) -> BoxFuture<'a, Branch> {
        async move {
            let node = Node::of(node);
            let path = match node {
                Node::Scalar(value) => {
                    let extended = scalar_text(value)
                        .ok_or(PathError::EmptySegment)
                        .and_then(|segment| path.child(segment));
                    match extended {
                        Ok(extended) => extended,
                        Err(e) => {
                            debug!(path = %path, error = %e, "Profile value is not a usable segment");
                            self.pruned += 1;
                            return Branch::Pruned;
                        }
                    }
                }
                _ => path,
            };

            match probe_latest(&mut *self.transport, &path).await {
                Ok(response) => {
                    trace!(path = %path, rsc = response.code, "Probed");
                    if response.is_found() {
                        self.register(&path);
                    }
                }
                Err(e) if e.is_connection_fault() => return Branch::Aborted(e),
                Err(e) => {
                    debug!(path = %path, error = %e, "Probe failed, pruning branch");
                    self.pruned += 1;
                    return Branch::Pruned;
                }
            }

            match node {
                Node::List(items) => {
                    for item in items {
                        if let Branch::Aborted(e) = self.walk(item, path.clone()).await {
                            return Branch::Aborted(e);
                        }
                    }
                }
                Node::Object(entries) => {
                    for (key, child) in entries {
                        let child_path = match path.child(key.as_str()) {
                            Ok(child_path) => child_path,
                            Err(e) => {
                                debug!(path = %path, key = %key, error = %e, "Skipping unusable key");
                                self.pruned += 1;
                                continue;
                            }
                        };
                        if let Branch::Aborted(e) = self.walk(child, child_path).await {
                            return Branch::Aborted(e);
                        }
                    }
                }
                Node::Scalar(_) | Node::Empty => {}
            }
            Branch::Walked
        }
        .boxed()
    }

    fn register(&mut self, path: &ResourcePath) {
        // The group root itself carries no per-item data
        if path.depth() == 0 {
            trace!(path = %path, "Ignoring group root");
            return;
        }
        if !self.registered.insert(path.clone()) {
            trace!(path = %path, "Channel already registered");
            return;
        }
        debug!(path = %path, "Found channel");
        self.channels.push(Channel::new(path.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use altherma_m2m::mock::ScriptedTransport;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 80)
    }

    /// Two groups behind a terminating 4004 at index 2
    fn two_group_device() -> ScriptedTransport {
        ScriptedTransport::new()
            .found("0", json!({"m2m:cnt": {"rn": "0", "lbl": "function/Adapter"}}))
            .content("0/la", json!("{\"version\":\"v1.2.3\"}"))
            .content(
                "0/UnitProfile/la",
                json!("{\"Sensor\":[\"OutdoorTemperature\"],\"UnitStatus\":[\"ErrorState\",\"WarningState\"]}"),
            )
            .content("0/Sensor/OutdoorTemperature/la", json!("7.5"))
            .content("0/UnitStatus/ErrorState/la", json!(0))
            .content("0/UnitStatus/WarningState/la", json!(0))
            .found("1", json!({"m2m:cnt": {"rn": "1", "lbl": "function/SpaceHeating"}}))
            .content(
                "1/UnitProfile/la",
                json!("{\"Operation\":{\"Power\":[\"on\",\"standby\"],\"TargetTemperature\":{\"heating\":{\"settable\":true}}},\"Sensor\":[\"IndoorTemperature\"]}"),
            )
            .content("1/Operation/Power/la", json!("on"))
            .content("1/Operation/TargetTemperature/la", json!(46.0))
            .content("1/Sensor/IndoorTemperature/la", json!("21.5"))
            .code("2", 4004)
    }

    fn paths(model: &ChannelModel) -> BTreeSet<String> {
        model.channels().map(|c| c.path.key()).collect()
    }

    fn roots(transport: &ScriptedTransport) -> Vec<String> {
        transport
            .queries()
            .into_iter()
            .filter(|q| !q.contains('/'))
            .collect()
    }

    #[tokio::test]
    async fn test_discovers_both_groups() {
        let mut transport = two_group_device();
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        let groups: Vec<&str> = model.groups().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(groups, ["Adapter", "SpaceHeating"]);
        assert_eq!(
            paths(&model),
            BTreeSet::from([
                "0/Sensor/OutdoorTemperature".to_string(),
                "0/UnitStatus/ErrorState".to_string(),
                "0/UnitStatus/WarningState".to_string(),
                "1/Operation/Power".to_string(),
                "1/Operation/TargetTemperature".to_string(),
                "1/Sensor/IndoorTemperature".to_string(),
            ])
        );
        assert_eq!(roots(&transport), ["0", "1", "2"]);
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_walk_follows_profile_shape() {
        let mut transport = two_group_device();
        discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        let queries = transport.queries();
        let group1: Vec<&str> = queries
            .iter()
            .map(String::as_str)
            .filter(|q| q.starts_with("1/"))
            .collect();
        assert_eq!(
            group1,
            [
                "1/UnitProfile/la",
                "1/la",
                "1/Operation/la",
                "1/Operation/Power/la",
                "1/Operation/Power/on/la",
                "1/Operation/Power/standby/la",
                "1/Operation/TargetTemperature/la",
                "1/Operation/TargetTemperature/heating/la",
                "1/Operation/TargetTemperature/heating/settable/true/la",
                "1/Sensor/la",
                "1/Sensor/IndoorTemperature/la",
            ]
        );
    }

    #[tokio::test]
    async fn test_absent_container_still_walks_children() {
        let mut transport = ScriptedTransport::new()
            .found("0", json!({"m2m:cnt": {"lbl": "function/DomesticHotWaterTank"}}))
            .content("0/UnitProfile/la", json!("{\"Operation\":{\"TargetTemperature\":null}}"))
            .code("0/Operation/la", 4004)
            .content("0/Operation/TargetTemperature/la", json!("48.0"))
            .code("1", 4004);
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        assert!(transport.queries().contains(&"0/Operation/la".to_string()));
        assert_eq!(paths(&model), BTreeSet::from(["0/Operation/TargetTemperature".to_string()]));
    }

    #[tokio::test]
    async fn test_repeated_group_labels_get_unique_ids() {
        let mut transport = ScriptedTransport::new()
            .found("0", json!({"m2m:cnt": {"lbl": "function/SpaceHeating"}}))
            .found("1", json!({"m2m:cnt": {"lbl": "function/SpaceHeating"}}))
            .code("2", 4004);
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        let ids: Vec<&str> = model.groups().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, ["SpaceHeating", "SpaceHeating-1"]);
        assert_eq!(model.groups()[1].label, "SpaceHeating-1");
    }

    #[tokio::test]
    async fn test_root_probe_success_is_not_a_channel() {
        let mut transport = two_group_device();
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        assert!(transport.queries().contains(&"0/la".to_string()));
        assert!(model.channels().all(|c| c.path.depth() > 0));
    }

    #[tokio::test]
    async fn test_stops_at_first_not_found_index() {
        let mut transport = ScriptedTransport::new()
            .found("0", json!({}))
            .found("1", json!({}))
            .code("2", 4004)
            .found("3", json!({}));
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        assert_eq!(roots(&transport), ["0", "1", "2"]);
        assert!(model.groups().len() <= 2);
        // No label: groups fall back to their index
        let groups: Vec<&str> = model.groups().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(groups, ["0", "1"]);
    }

    #[tokio::test]
    async fn test_group_scan_is_bounded() {
        let mut transport = ScriptedTransport::new();
        for i in 0..10 {
            transport = transport.found(&i.to_string(), json!({}));
        }
        let config = DiscoveryConfig { max_groups: 3 };
        let model = discover(&mut transport, &endpoint(), &config).await.unwrap();

        assert_eq!(model.groups().len(), 3);
        assert_eq!(roots(&transport), ["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_failed_probe_prunes_only_its_branch() {
        let mut transport = two_group_device().time_out("1/Operation/Power/la");
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        let found = paths(&model);
        assert!(!found.contains("1/Operation/Power"));
        assert!(found.contains("1/Operation/TargetTemperature"));
        assert!(found.contains("1/Sensor/IndoorTemperature"));
        assert_eq!(found.len(), 5);

        let queries = transport.queries();
        assert!(!queries.contains(&"1/Operation/Power/on/la".to_string()));
        assert!(!queries.contains(&"1/Operation/Power/standby/la".to_string()));
    }

    #[tokio::test]
    async fn test_connection_loss_aborts_discovery() {
        let mut transport = two_group_device().fail(
            "1/Sensor/la",
            TransportError::Connection("reset by peer".to_string()),
        );
        let err = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Connection(_)));
        assert_eq!(transport.disconnects(), 1);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let mut transport = two_group_device().refuse_connections();
        let err = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Connection(_)));
        assert!(transport.queries().is_empty());
        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_discovery_is_deterministic() {
        let mut first = two_group_device();
        let mut second = two_group_device();
        let a = discover(&mut first, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();
        let b = discover(&mut second, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        assert_eq!(a.len(), b.len());
        assert_eq!(paths(&a), paths(&b));
        let ids_a: Vec<_> = a.channels().map(|c| c.id.clone()).collect();
        let ids_b: Vec<_> = b.channels().map(|c| c.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_broken_profile_keeps_group_and_continues() {
        let mut transport = ScriptedTransport::new()
            .found("0", json!({}))
            .content("0/UnitProfile/la", json!("{broken"))
            .found("1", json!({}))
            .content("1/UnitProfile/la", json!({"Sensor": ["Flow"]}))
            .content("1/Sensor/Flow/la", json!("12"));
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        assert_eq!(model.groups().len(), 2);
        assert!(model.groups()[0].channels.is_empty());
        assert_eq!(paths(&model), BTreeSet::from(["1/Sensor/Flow".to_string()]));
    }

    #[tokio::test]
    async fn test_repeated_list_paths_register_once() {
        let mut transport = ScriptedTransport::new()
            .found("0", json!({}))
            .content("0/UnitProfile/la", json!("{\"Modes\":[{\"a\":1},{\"a\":1}],\"Odd\":[\"x/y\",null]}"))
            .content("0/Modes/a/1/la", json!("on"))
            .content("0/Modes/la", json!("on"));
        let model = discover(&mut transport, &endpoint(), &DiscoveryConfig::default())
            .await
            .unwrap();

        assert_eq!(
            paths(&model),
            BTreeSet::from(["0/Modes".to_string(), "0/Modes/a/1".to_string()])
        );
        let queries = transport.queries();
        assert_eq!(queries.iter().filter(|q| *q == "0/Modes/a/1/la").count(), 2);
        // A value containing the separator cannot become a segment
        assert!(!queries.iter().any(|q| q.contains("x/y")));
    }

    #[test]
    fn test_group_name() {
        assert_eq!(group_name(1, Some(&json!("function/SpaceHeating"))), "SpaceHeating");
        assert_eq!(group_name(1, Some(&json!("a/b/c"))), "b/c");
        assert_eq!(group_name(2, Some(&json!("Plain"))), "Plain");
        assert_eq!(group_name(3, Some(&json!("function/"))), "3");
        assert_eq!(group_name(4, Some(&json!({"x": 1}))), "4");
        assert_eq!(group_name(5, None), "5");
    }
}
