//! Keeps collections in sync with the rest of the system.
//!
//! The maintainer subscribes to a fixed topic set and maps each event to
//! a mutation of the [`LocalCollection`]. Mutations run under the store
//! mutex and persist the affected profile files before the handler
//! returns, so a publisher that awaits `publish` observes the collection
//! already updated. Handler errors are logged and never retried.

use crate::{Error, LocalCollection, WritableSet};
use bus::{Bus, Event, Payload, Topic};
use profiles::ProfileId;

/// Attaches the collection state machine to a bus.
pub struct SetMaintainer;

impl SetMaintainer {
    pub fn attach(bus: &Bus, store: LocalCollection) {
        let datasets = store.clone();
        bus.subscribe(
            &[
                Topic::DatasetNameInit,
                Topic::DatasetCommitChange,
                Topic::DatasetRename,
                Topic::DatasetDeleteAll,
                Topic::DatasetPulled,
                Topic::DatasetPushed,
                Topic::RegistryProfileCreated,
            ],
            move |event| {
                let store = datasets.clone();
                async move { handle_dataset_event(&store, event) }
            },
        );

        let automation = store;
        bus.subscribe(
            &[
                Topic::AutomationDeployStart,
                Topic::AutomationDeployEnd,
                Topic::AutomationWorkflowStarted,
                Topic::AutomationWorkflowStopped,
                Topic::FsiCreateLink,
                Topic::FsiRemoveLink,
            ],
            move |event| {
                let store = automation.clone();
                async move { handle_automation_event(&store, event) }
            },
        );
    }
}

fn handle_dataset_event(store: &LocalCollection, event: Event) -> anyhow::Result<()> {
    match (event.topic, event.payload) {
        (Topic::DatasetNameInit, Payload::VersionInfo(vi)) => {
            let owner = author_of(&vi)?;
            store.add(&owner, vec![*vi])?;
        }
        (Topic::DatasetCommitChange, Payload::VersionInfo(vi)) => {
            store.replace_everywhere(&vi)?;
        }
        // whoever pulled or pushed, every collection tracking datasets
        // sees the new head (multi-tenant scoping is an open question
        // upstream of this store, see DESIGN.md)
        (Topic::DatasetPulled, Payload::VersionInfo(vi))
        | (Topic::DatasetPushed, Payload::VersionInfo(vi)) => {
            store.upsert_everywhere(&vi)?;
        }
        (Topic::DatasetRename, Payload::Rename(rename)) => {
            store.rename_everywhere(&rename.init_id, &rename.new_name)?;
        }
        (Topic::DatasetDeleteAll, Payload::InitId(init_id)) => match event.scope {
            Some(owner) => match store.delete(&owner, &[init_id]) {
                Ok(()) | Err(Error::NotFound) => {}
                Err(e) => return Err(e.into()),
            },
            None => {
                tracing::warn!(init_id = %init_id, "delete event without profile scope, ignoring");
            }
        },
        (Topic::RegistryProfileCreated, Payload::ProfileCreated(created)) => {
            store.update_username(&created.profile_id, &created.username)?;
        }
        (topic, payload) => {
            tracing::warn!(?topic, ?payload, "unexpected payload for dataset event");
        }
    }
    Ok(())
}

fn handle_automation_event(store: &LocalCollection, event: Event) -> anyhow::Result<()> {
    match (event.topic, event.payload) {
        (Topic::AutomationDeployStart, Payload::Deploy(deploy)) => {
            store.update_everywhere(&deploy.init_id, |vi| {
                vi.workflow_id = deploy.workflow_id.clone();
            })?;
        }
        (Topic::AutomationDeployEnd, Payload::Deploy(deploy)) => {
            store.update_everywhere(&deploy.init_id, |vi| {
                if deploy.error.is_some() {
                    vi.workflow_id.clear();
                } else {
                    vi.workflow_id = deploy.workflow_id.clone();
                }
            })?;
        }
        (Topic::AutomationWorkflowStarted, Payload::WorkflowRun(run)) => {
            store.update_everywhere(&run.init_id, |vi| {
                vi.run_id = run.run_id.clone();
                vi.run_status = "running".to_owned();
            })?;
        }
        (Topic::AutomationWorkflowStopped, Payload::WorkflowRun(run)) => {
            store.update_everywhere(&run.init_id, |vi| {
                vi.run_id.clear();
                vi.run_status.clear();
            })?;
        }
        (Topic::FsiCreateLink, Payload::FsiLink(link)) => {
            store.update_everywhere(&link.init_id, |vi| {
                vi.fsi_path = link.fsi_path.clone();
            })?;
        }
        (Topic::FsiRemoveLink, Payload::InitId(init_id)) => {
            store.update_everywhere(&init_id, |vi| vi.fsi_path.clear())?;
        }
        (topic, payload) => {
            tracing::warn!(?topic, ?payload, "unexpected payload for automation event");
        }
    }
    Ok(())
}

fn author_of(vi: &dsref::VersionInfo) -> anyhow::Result<ProfileId> {
    ProfileId::from_base58(&vi.profile_id)
        .map_err(|e| anyhow::anyhow!("event item has no usable author: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Set;
    use bus::{DatasetRename, Deploy, FsiLink, ProfileCreated, WorkflowRun};
    use dsref::VersionInfo;
    use util::params::List;

    const KERMIT: &str = "3mJr7A";
    const MISS_PIGGY: &str = "3yZe7d";

    fn kermit() -> ProfileId {
        ProfileId::from_base58(KERMIT).unwrap()
    }

    fn item(init_id: &str, name: &str) -> VersionInfo {
        VersionInfo::new(init_id, KERMIT, "kermit", name)
    }

    fn wired() -> (Bus, LocalCollection) {
        let bus = Bus::new();
        let store = LocalCollection::in_memory();
        SetMaintainer::attach(&bus, store.clone());
        (bus, store)
    }

    async fn publish_init(bus: &Bus, vi: VersionInfo) {
        bus.publish(Topic::DatasetNameInit, Payload::VersionInfo(Box::new(vi)))
            .await;
    }

    #[tokio::test]
    async fn name_init_creates_the_authors_entry() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;

        let listed = store.list(&kermit(), &List::list_all()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "muppet_names");
    }

    #[tokio::test]
    async fn commit_change_updates_and_preserves_fsi_path() {
        let (bus, store) = wired();
        let mut linked = item("i1", "muppet_names");
        linked.fsi_path = "/home/kermit/muppet_names".to_owned();
        publish_init(&bus, linked).await;

        let mut head = item("i1", "muppet_names");
        head.path = "/m/v1".to_owned();
        head.commit_count = 2;
        head.body_size = 20;
        bus.publish(Topic::DatasetCommitChange, Payload::VersionInfo(Box::new(head)))
            .await;

        let stored = store.get(&kermit(), "i1").unwrap();
        assert_eq!(stored.path, "/m/v1");
        assert_eq!(stored.commit_count, 2);
        assert_eq!(stored.body_size, 20);
        assert_eq!(stored.fsi_path, "/home/kermit/muppet_names");
    }

    #[tokio::test]
    async fn rename_touches_every_collection_and_nothing_else() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;
        publish_init(&bus, item("i2", "gonzo_facts")).await;
        // a second profile tracking the same dataset
        let piggy = ProfileId::from_base58(MISS_PIGGY).unwrap();
        store.add(&piggy, vec![item("i1", "muppet_names")]).unwrap();

        bus.publish(
            Topic::DatasetRename,
            Payload::Rename(DatasetRename {
                init_id: "i1".into(),
                old_name: "muppet_names".into(),
                new_name: "muppet_names_and_ages".into(),
            }),
        )
        .await;

        assert_eq!(store.get(&kermit(), "i1").unwrap().name, "muppet_names_and_ages");
        assert_eq!(store.get(&piggy, "i1").unwrap().name, "muppet_names_and_ages");
        assert_eq!(store.get(&kermit(), "i2").unwrap().name, "gonzo_facts");
    }

    #[tokio::test]
    async fn delete_without_scope_is_a_no_op() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;

        bus.publish(Topic::DatasetDeleteAll, Payload::InitId("i1".into()))
            .await;
        assert!(store.get(&kermit(), "i1").is_ok());

        bus.publish_scoped(kermit(), Topic::DatasetDeleteAll, Payload::InitId("i1".into()))
            .await;
        assert!(store.get(&kermit(), "i1").is_err());
    }

    #[tokio::test]
    async fn delete_removes_from_the_scoped_profile_only() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;
        let piggy = ProfileId::from_base58(MISS_PIGGY).unwrap();
        store.add(&piggy, vec![item("i1", "muppet_names")]).unwrap();

        bus.publish_scoped(kermit(), Topic::DatasetDeleteAll, Payload::InitId("i1".into()))
            .await;

        assert!(store.get(&kermit(), "i1").is_err());
        assert!(store.get(&piggy, "i1").is_ok());
    }

    #[tokio::test]
    async fn registry_username_change_rewrites_matching_items() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "a")).await;
        publish_init(&bus, item("i2", "b")).await;
        publish_init(&bus, item("i3", "c")).await;
        let mut other = VersionInfo::new("i4", MISS_PIGGY, "peggy", "d");
        other.path = "/m/other".to_owned();
        store.add(&kermit(), vec![other]).unwrap();

        bus.publish(
            Topic::RegistryProfileCreated,
            Payload::ProfileCreated(ProfileCreated {
                profile_id: KERMIT.into(),
                username: "kermit_the_frog".into(),
            }),
        )
        .await;

        let listed = store.list(&kermit(), &List::list_all()).unwrap();
        for vi in &listed {
            if vi.profile_id == KERMIT {
                assert_eq!(vi.username, "kermit_the_frog");
            } else {
                assert_eq!(vi.username, "peggy");
            }
        }
    }

    #[tokio::test]
    async fn pulled_datasets_land_in_every_collection() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "a")).await;
        let piggy = ProfileId::from_base58(MISS_PIGGY).unwrap();
        store.add(&piggy, vec![item("i2", "b")]).unwrap();

        let mut pulled = VersionInfo::new("i9", MISS_PIGGY, "peggy", "imported");
        pulled.path = "/m/v9".to_owned();
        bus.publish(Topic::DatasetPulled, Payload::VersionInfo(Box::new(pulled)))
            .await;

        assert!(store.get(&kermit(), "i9").is_ok());
        assert!(store.get(&piggy, "i9").is_ok());
    }

    #[tokio::test]
    async fn automation_workflow_run_lifecycle() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;

        bus.publish(
            Topic::AutomationWorkflowStarted,
            Payload::WorkflowRun(WorkflowRun {
                init_id: "i1".into(),
                run_id: "R1".into(),
            }),
        )
        .await;
        let running = store.get(&kermit(), "i1").unwrap();
        assert_eq!(running.run_id, "R1");
        assert_eq!(running.run_status, "running");

        bus.publish(
            Topic::AutomationWorkflowStopped,
            Payload::WorkflowRun(WorkflowRun {
                init_id: "i1".into(),
                run_id: "R1".into(),
            }),
        )
        .await;
        let stopped = store.get(&kermit(), "i1").unwrap();
        assert_eq!(stopped.run_id, "");
        assert_eq!(stopped.run_status, "");
    }

    #[tokio::test]
    async fn deploy_sets_and_clears_workflow_ids() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;

        bus.publish(
            Topic::AutomationDeployStart,
            Payload::Deploy(Deploy {
                init_id: "i1".into(),
                workflow_id: "wf-1".into(),
                error: None,
            }),
        )
        .await;
        assert_eq!(store.get(&kermit(), "i1").unwrap().workflow_id, "wf-1");

        bus.publish(
            Topic::AutomationDeployEnd,
            Payload::Deploy(Deploy {
                init_id: "i1".into(),
                workflow_id: "wf-1".into(),
                error: Some("compile failed".into()),
            }),
        )
        .await;
        assert_eq!(store.get(&kermit(), "i1").unwrap().workflow_id, "");
    }

    #[tokio::test]
    async fn fsi_link_lifecycle() {
        let (bus, store) = wired();
        publish_init(&bus, item("i1", "muppet_names")).await;

        bus.publish(
            Topic::FsiCreateLink,
            Payload::FsiLink(FsiLink {
                init_id: "i1".into(),
                fsi_path: "/home/kermit/muppet_names".into(),
            }),
        )
        .await;
        assert_eq!(
            store.get(&kermit(), "i1").unwrap().fsi_path,
            "/home/kermit/muppet_names"
        );

        bus.publish(Topic::FsiRemoveLink, Payload::InitId("i1".into()))
            .await;
        assert_eq!(store.get(&kermit(), "i1").unwrap().fsi_path, "");
    }

    #[tokio::test]
    async fn full_dataset_lifecycle_ends_empty() {
        let (bus, store) = wired();
        publish_init(&bus, item("I1", "muppet_names")).await;

        let mut head = item("I1", "muppet_names");
        head.path = "/m/v1".to_owned();
        head.commit_count = 2;
        head.body_size = 20;
        bus.publish(Topic::DatasetCommitChange, Payload::VersionInfo(Box::new(head)))
            .await;

        bus.publish(
            Topic::DatasetRename,
            Payload::Rename(DatasetRename {
                init_id: "I1".into(),
                old_name: "muppet_names".into(),
                new_name: "muppet_names_and_ages".into(),
            }),
        )
        .await;
        let renamed = store.get(&kermit(), "I1").unwrap();
        assert_eq!(renamed.name, "muppet_names_and_ages");
        assert_eq!(renamed.commit_count, 2);

        bus.publish_scoped(kermit(), Topic::DatasetDeleteAll, Payload::InitId("I1".into()))
            .await;
        assert_eq!(
            store.list(&kermit(), &List::list_all()).unwrap(),
            Vec::<VersionInfo>::new()
        );
    }
}
