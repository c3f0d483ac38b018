//! In-memory stand-ins for the cluster, the database server and ssh that
//! record every call in order.

use std::{
    collections::{BTreeSet, HashMap},
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use homelab_spark_core::{
    bundle::{BundleResource, ResourceKind},
    client::{self, Deletion},
    constants::POD_PHASE_RUNNING,
};
use kube::error::ErrorResponse;

use crate::{cluster::SparkCluster, db, ssh};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    ListSparks,
    CreateResource(ResourceKind, String),
    DeleteResource(ResourceKind, String),
    ReadyReplicas(String),
    PodPhases(String),
    CreateDatabase(String),
    DropDatabase(String),
    OpenShell(String),
}

pub type Journal = Arc<Mutex<Vec<Call>>>;

fn record(journal: &Journal, call: Call) {
    journal.lock().unwrap().push(call);
}

pub fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: "injected".to_owned(),
        reason: "InternalError".to_owned(),
        code,
    })
}

#[derive(Default)]
pub struct FakeCluster {
    pub journal: Journal,
    pub objects: Mutex<BTreeSet<(ResourceKind, String)>>,
    pub fail_create: Option<ResourceKind>,
    pub fail_delete: Option<ResourceKind>,
    pub fail_list: bool,
    /// Pod phase queries up to this count report `Pending`, later ones `Running`.
    pub running_from_query: Option<u32>,
    pub pod_phase_override: Option<Vec<String>>,
    /// Spark names whose status query fails.
    pub failing_status: BTreeSet<String>,
    pub ready_replicas: HashMap<String, i32>,
    pub pod_queries: Mutex<u32>,
}

impl FakeCluster {
    pub fn with_journal(journal: &Journal) -> Self {
        FakeCluster {
            journal: journal.clone(),
            ..FakeCluster::default()
        }
    }

    /// Registers all five objects of an existing spark.
    pub fn insert_spark(&self, spark: &str) {
        let mut objects = self.objects.lock().unwrap();
        for kind in ResourceKind::CREATION_ORDER {
            objects.insert((kind, kind.object_name(spark)));
        }
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains(&(kind, name.to_owned()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl SparkCluster for FakeCluster {
    async fn create_resource(&self, resource: BundleResource) -> Result<(), client::Error> {
        let kind = resource.kind();
        let name = resource.name().to_owned();
        record(&self.journal, Call::CreateResource(kind, name.clone()));

        if self.fail_create == Some(kind) {
            return Err(client::Error::CreateObject {
                source: api_error(500),
                kind: kind.to_string(),
                name,
            });
        }
        let mut objects = self.objects.lock().unwrap();
        if !objects.insert((kind, name.clone())) {
            return Err(client::Error::AlreadyExists {
                kind: kind.to_string(),
                name,
            });
        }
        Ok(())
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Deletion, client::Error> {
        record(&self.journal, Call::DeleteResource(kind, name.to_owned()));

        if self.fail_delete == Some(kind) {
            return Err(client::Error::DeleteObject {
                source: api_error(500),
                kind: kind.to_string(),
                name: name.to_owned(),
            });
        }
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&(kind, name.to_owned()));
        Ok(if removed {
            Deletion::Deleted
        } else {
            Deletion::Absent
        })
    }

    async fn list_spark_names(&self) -> Result<Vec<String>, client::Error> {
        record(&self.journal, Call::ListSparks);

        if self.fail_list {
            return Err(client::Error::ListObjects {
                source: api_error(503),
                kind: "Deployment".to_owned(),
                selector: "app=spark".to_owned(),
            });
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == ResourceKind::Deployment)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn workload_ready_replicas(&self, spark: &str) -> Result<Option<i32>, client::Error> {
        record(&self.journal, Call::ReadyReplicas(spark.to_owned()));

        if self.failing_status.contains(spark) {
            return Err(client::Error::GetObject {
                source: api_error(500),
                kind: "Deployment".to_owned(),
                name: spark.to_owned(),
            });
        }
        if !self.contains(ResourceKind::Deployment, spark) {
            return Ok(None);
        }
        Ok(Some(self.ready_replicas.get(spark).copied().unwrap_or(0)))
    }

    async fn pod_phases(&self, spark: &str) -> Result<Vec<String>, client::Error> {
        record(&self.journal, Call::PodPhases(spark.to_owned()));

        let query = {
            let mut queries = self.pod_queries.lock().unwrap();
            *queries += 1;
            *queries
        };
        if let Some(phases) = &self.pod_phase_override {
            return Ok(phases.clone());
        }
        match self.running_from_query {
            Some(first) if query >= first => Ok(vec![POD_PHASE_RUNNING.to_owned()]),
            _ => Ok(vec!["Pending".to_owned()]),
        }
    }
}

#[derive(Default)]
pub struct FakeDatabase {
    pub journal: Journal,
    pub databases: Mutex<BTreeSet<String>>,
    pub fail_create: bool,
    pub fail_drop: bool,
}

impl FakeDatabase {
    pub fn with_journal(journal: &Journal) -> Self {
        FakeDatabase {
            journal: journal.clone(),
            ..FakeDatabase::default()
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.databases.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl db::DatabaseAdmin for FakeDatabase {
    async fn create_database(&self, name: &str) -> Result<(), db::Error> {
        record(&self.journal, Call::CreateDatabase(name.to_owned()));

        if self.fail_create || !self.databases.lock().unwrap().insert(name.to_owned()) {
            return Err(db::Error::DatabaseExists {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), db::Error> {
        record(&self.journal, Call::DropDatabase(name.to_owned()));

        if self.fail_drop {
            return Err(db::Error::InvalidDatabaseName {
                name: name.to_owned(),
            });
        }
        self.databases.lock().unwrap().remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeShell {
    pub journal: Journal,
    pub fail: bool,
}

impl FakeShell {
    pub fn with_journal(journal: &Journal) -> Self {
        FakeShell {
            journal: journal.clone(),
            ..FakeShell::default()
        }
    }
}

#[async_trait]
impl ssh::RemoteShell for FakeShell {
    async fn open(&self, destination: &str) -> Result<(), ssh::Error> {
        record(&self.journal, Call::OpenShell(destination.to_owned()));

        if self.fail {
            return Err(ssh::Error::SessionFailed {
                destination: destination.to_owned(),
                status: ExitStatus::from_raw(255 << 8),
            });
        }
        Ok(())
    }
}

pub fn calls(journal: &Journal) -> Vec<Call> {
    journal.lock().unwrap().clone()
}
