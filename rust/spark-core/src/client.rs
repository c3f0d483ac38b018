//! A namespaced, typed view on the Kubernetes API.
//!
//! Every call is scoped to the namespace the client was built for. Conflicts on
//! create and missing objects on delete are surfaced as values instead of raw
//! API errors.

use std::{fmt::Debug, path::Path};

use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Resource,
    api::{DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use tracing::debug;

const HTTP_NOT_FOUND: u16 = 404;
const HTTP_CONFLICT: u16 = 409;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to read kubeconfig {path:?}"))]
    ReadKubeconfig {
        source: KubeconfigError,
        path: String,
    },

    #[snafu(display("failed to load kubeconfig {path:?}"))]
    LoadKubeconfig {
        source: KubeconfigError,
        path: String,
    },

    #[snafu(display("{kind} {name:?} already exists"))]
    AlreadyExists { kind: String, name: String },

    #[snafu(display("failed to create {kind} {name:?}"))]
    CreateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to delete {kind} {name:?}"))]
    DeleteObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to get {kind} {name:?}"))]
    GetObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to list {kind} matching {selector:?}"))]
    ListObjects {
        source: kube::Error,
        kind: String,
        selector: String,
    },
}

/// What a delete call found.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Deletion {
    Deleted,
    Absent,
}

#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    namespace: String,
}

impl Client {
    /// Infers the connection from the environment (kubeconfig or in-cluster).
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self, Error> {
        let client = kube::Client::try_default()
            .await
            .context(CreateClientSnafu)?;
        Ok(Self::new(client, namespace))
    }

    pub async fn from_kubeconfig(
        path: &Path,
        namespace: impl Into<String>,
    ) -> Result<Self, Error> {
        let display_path = path.display().to_string();
        let kubeconfig = Kubeconfig::read_from(path).context(ReadKubeconfigSnafu {
            path: display_path.clone(),
        })?;
        let config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context(LoadKubeconfigSnafu { path: display_path })?;
        let client = kube::Client::try_from(config).context(CreateClientSnafu)?;
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: kube::Client, namespace: impl Into<String>) -> Self {
        Client {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub async fn create<K>(&self, object: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Serialize,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).into_owned();
        let name = object.meta().name.clone().unwrap_or_default();
        debug!(%kind, %name, namespace = %self.namespace, "Creating object");

        match self.api::<K>().create(&PostParams::default(), object).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == HTTP_CONFLICT => {
                AlreadyExistsSnafu { kind, name }.fail()
            }
            Err(source) => Err(Error::CreateObject { source, kind, name }),
        }
    }

    pub async fn delete<K>(&self, name: &str) -> Result<Deletion, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).into_owned();
        debug!(%kind, %name, namespace = %self.namespace, "Deleting object");

        match self.api::<K>().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(Deletion::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == HTTP_NOT_FOUND => Ok(Deletion::Absent),
            Err(source) => Err(Error::DeleteObject {
                source,
                kind,
                name: name.to_owned(),
            }),
        }
    }

    pub async fn get_opt<K>(&self, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>()
            .get_opt(name)
            .await
            .with_context(|_| GetObjectSnafu {
                kind: K::kind(&K::DynamicType::default()).into_owned(),
                name,
            })
    }

    pub async fn list<K>(&self, selector: &str) -> Result<Vec<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let objects = self
            .api::<K>()
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|_| ListObjectsSnafu {
                kind: K::kind(&K::DynamicType::default()).into_owned(),
                selector,
            })?;
        Ok(objects.items)
    }
}
