//! Converges the proxy control plane to the container records in the store.
//!
//! Every operation here is safe to repeat: updates take the set union of
//! live and built members, removals only touch members that are present,
//! and deleting something already gone is a no-op.  A failed control plane
//! call abandons that backend or frontend only; the next notification for
//! the same container retries it.

use async_trait::async_trait;
use log::{debug, error, info};

use super::model::{self, Backend, Member};
use super::{ControlPlane, Proxy};
use crate::types::ContainerRecord;

pub struct Reconciler<C> {
    control: C,
}

impl<C: ControlPlane> Reconciler<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    #[cfg(test)]
    pub fn control(&self) -> &C {
        &self.control
    }

    async fn update_backend(&self, key: &str, mut built: Backend) {
        let live = match self.control.get_backend(key).await {
            Ok(Some(live)) => live.members,
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("Failed to fetch backend {}: {}", key, e);
                return;
            }
        };

        built.members = merge_members(live, &built.members);
        built.clear_identity();
        if let Err(e) = self.control.put_backend(key, &built).await {
            error!("Failed to put backend {}: {}", key, e);
        }
    }

    async fn remove_from_backend(&self, key: &str, contributed: &[Member]) {
        let mut live = match self.control.get_backend(key).await {
            Ok(Some(live)) => live,
            Ok(None) => {
                debug!("Backend {} already gone", key);
                return;
            }
            Err(e) => {
                error!("Failed to fetch backend {}: {}", key, e);
                return;
            }
        };

        if is_last_members(&live.members, contributed) {
            info!("Backend {} holds only this container's members, tearing down", key);
            // The frontend goes first so it never points at a missing backend.
            if let Err(e) = self.control.delete_frontend(key).await {
                error!("Failed to delete frontend {}: {}", key, e);
                return;
            }
            if let Err(e) = self.control.delete_backend(key).await {
                error!("Failed to delete backend {}: {}", key, e);
            }
            return;
        }

        let before = live.members.len();
        live.members.retain(|m| !contributed.contains(m));
        if live.members.len() == before {
            debug!("Backend {} has none of the removed members", key);
            return;
        }

        info!(
            "Removing {} member(s) from backend {}",
            before - live.members.len(),
            key
        );
        live.clear_identity();
        if let Err(e) = self.control.put_backend(key, &live).await {
            error!("Failed to put backend {}: {}", key, e);
        }
    }
}

#[async_trait]
impl<C: ControlPlane> Proxy for Reconciler<C> {
    async fn container_updated(&self, record: &ContainerRecord) {
        info!("Converging proxy for new or updated container {}", record.id);
        let built = model::build(record);
        debug!("Built model for {}: {:?}", record.id, built);

        for (key, backend) in built.backends {
            self.update_backend(&key, backend).await;
        }

        for (key, frontend) in &built.frontends {
            if let Err(e) = self.control.put_frontend(key, frontend).await {
                error!("Failed to put frontend {}: {}", key, e);
            }
        }
    }

    async fn container_removed(&self, record: &ContainerRecord) {
        info!("Converging proxy for removed container {}", record.id);
        let built = model::build(record);

        for (key, backend) in &built.backends {
            self.remove_from_backend(key, &backend.members).await;
        }
    }
}

/// Set union of `live` and `built` over `(host, port)`.  Live members keep
/// their order; new members are appended.
pub fn merge_members(mut live: Vec<Member>, built: &[Member]) -> Vec<Member> {
    let mut merged: Vec<Member> = Vec::with_capacity(live.len() + built.len());
    for m in live.drain(..).chain(built.iter().cloned()) {
        if !merged.contains(&m) {
            merged.push(m);
        }
    }
    merged
}

/// True when every live member was contributed by the container being
/// removed, compared by value.
pub fn is_last_members(live: &[Member], contributed: &[Member]) -> bool {
    live.iter().all(|m| contributed.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::fake::{Call, FakeControlPlane};
    use crate::proxy::model::Kind;

    fn m(host: &str, port: u16) -> Member {
        Member {
            host: host.into(),
            port,
        }
    }

    fn backend(key: &str, members: Vec<Member>) -> Backend {
        Backend {
            key: Some(key.into()),
            id: Some(format!("backend/{}", key)),
            name: key.into(),
            kind: Kind::Static,
            mode: Default::default(),
            balance: "roundrobin".into(),
            members,
        }
    }

    fn container(id: &str, host: &str, host_port: u16) -> ContainerRecord {
        ContainerRecord::new(id, "web", host).publish("80/tcp", "0.0.0.0", host_port)
    }

    #[test]
    fn merge_is_a_set_union() {
        let merged = merge_members(vec![m("h1", 1), m("h2", 2)], &[m("h1", 1), m("h3", 3)]);
        assert_eq!(merged, vec![m("h1", 1), m("h2", 2), m("h3", 3)]);
    }

    #[test]
    fn merge_does_not_stop_at_first_mismatch() {
        let merged = merge_members(vec![m("h9", 9)], &[m("h1", 1), m("h2", 2), m("h9", 9)]);
        assert_eq!(merged, vec![m("h9", 9), m("h1", 1), m("h2", 2)]);
    }

    #[test]
    fn merge_collapses_duplicates_within_live() {
        let merged = merge_members(vec![m("h1", 1), m("h1", 1)], &[]);
        assert_eq!(merged, vec![m("h1", 1)]);
    }

    #[test]
    fn last_member_check_uses_value_equality() {
        // Same members, different order.
        assert!(is_last_members(
            &[m("h2", 2), m("h1", 1)],
            &[m("h1", 1), m("h2", 2)]
        ));
        // Same length, different members.
        assert!(!is_last_members(&[m("h3", 3)], &[m("h1", 1)]));
        assert!(!is_last_members(&[m("h1", 1), m("h2", 2)], &[m("h1", 1)]));
        assert!(is_last_members(&[], &[m("h1", 1)]));
    }

    #[tokio::test]
    async fn update_creates_backend_and_frontend() {
        let r = Reconciler::new(FakeControlPlane::default());
        r.container_updated(&container("c1", "10.0.0.5", 31000)).await;

        let b = r.control().backend("web:80").unwrap();
        assert_eq!(b.members, vec![m("10.0.0.5", 31000)]);
        let f = r.control().frontend("web:80").unwrap();
        assert_eq!(f.bind, "*:80");
        assert_eq!(f.backend, "web:80");
    }

    #[tokio::test]
    async fn update_merges_with_live_members() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h1", 1), m("h2", 2)]));
        let r = Reconciler::new(cp);

        let rec = ContainerRecord::new("c3", "web", "h1")
            .publish("80/tcp", "", 1)
            .publish("80/tcp", "10.1.1.1", 3);
        r.container_updated(&rec).await;
        // Host is taken from the record, so (h1, 3) is new.
        let members = r.control().backend("web:80").unwrap().members;
        assert_eq!(members, vec![m("h1", 1), m("h2", 2), m("h1", 3)]);
    }

    #[tokio::test]
    async fn update_clears_identity_fields_on_put() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h2", 2)]));
        let r = Reconciler::new(cp);
        r.container_updated(&container("c1", "h1", 1)).await;

        let put = r.control().backend("web:80").unwrap();
        assert_eq!(put.key, None);
        assert_eq!(put.id, None);
    }

    #[tokio::test]
    async fn repeated_update_is_idempotent() {
        let r = Reconciler::new(FakeControlPlane::default());
        let rec = container("c1", "10.0.0.5", 31000);
        r.container_updated(&rec).await;
        let once = r.control().backend("web:80");
        r.container_updated(&rec).await;
        assert_eq!(r.control().backend("web:80"), once);
    }

    #[tokio::test]
    async fn removal_of_last_members_deletes_frontend_then_backend() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h1", 1)]));
        let r = Reconciler::new(cp);

        r.container_removed(&container("c1", "h1", 1)).await;

        let calls = r.control().calls();
        let fe = calls
            .iter()
            .position(|c| *c == Call::DeleteFrontend("web:80".into()))
            .unwrap();
        let be = calls
            .iter()
            .position(|c| *c == Call::DeleteBackend("web:80".into()))
            .unwrap();
        assert!(fe < be);
        assert!(r.control().backend("web:80").is_none());
    }

    #[tokio::test]
    async fn partial_removal_preserves_siblings() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h1", 1), m("h2", 2)]));
        let r = Reconciler::new(cp);

        r.container_removed(&container("c1", "h1", 1)).await;

        let b = r.control().backend("web:80").unwrap();
        assert_eq!(b.members, vec![m("h2", 2)]);
        assert_eq!(b.key, None);
        assert!(!r
            .control()
            .calls()
            .iter()
            .any(|c| matches!(c, Call::DeleteBackend(_) | Call::DeleteFrontend(_))));
    }

    #[tokio::test]
    async fn removal_with_reordered_members_is_not_a_teardown() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h2", 2), m("h1", 1)]));
        let r = Reconciler::new(cp);

        r.container_removed(&container("c1", "h1", 1)).await;
        assert_eq!(
            r.control().backend("web:80").unwrap().members,
            vec![m("h2", 2)]
        );
    }

    #[tokio::test]
    async fn removal_of_absent_backend_is_a_no_op() {
        let r = Reconciler::new(FakeControlPlane::default());
        r.container_removed(&container("c1", "h1", 1)).await;
        assert_eq!(r.control().calls(), vec![Call::GetBackend("web:80".into())]);
    }

    #[tokio::test]
    async fn duplicate_removal_does_not_write() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h2", 2), m("h3", 3)]));
        let r = Reconciler::new(cp);

        r.container_removed(&container("c1", "h1", 1)).await;
        assert!(!r
            .control()
            .calls()
            .iter()
            .any(|c| matches!(c, Call::PutBackend(_))));
    }

    #[tokio::test]
    async fn failed_frontend_delete_keeps_backend() {
        let cp = FakeControlPlane::default();
        cp.seed_backend("web:80", backend("web:80", vec![m("h1", 1)]));
        cp.fail_on(Call::DeleteFrontend("web:80".into()));
        let r = Reconciler::new(cp);

        r.container_removed(&container("c1", "h1", 1)).await;
        assert!(r.control().backend("web:80").is_some());
    }

    #[tokio::test]
    async fn failure_on_one_backend_does_not_stop_the_others() {
        let cp = FakeControlPlane::default();
        cp.fail_on(Call::GetBackend("web:80".into()));
        let r = Reconciler::new(cp);

        let rec = container("c1", "h1", 1).publish("443/tcp", "", 2);
        r.container_updated(&rec).await;

        assert!(r.control().backend("web:80").is_none());
        assert_eq!(r.control().backend("web:443").unwrap().members, vec![m("h1", 2)]);
        // Frontends are upserted regardless.
        assert!(r.control().frontend("web:80").is_some());
    }
}
