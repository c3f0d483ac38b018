use async_trait::async_trait;
use homelab_spark_core::{
    bundle::{BundleResource, ResourceKind, spark_selector},
    client::{self, Client, Deletion},
    constants::{LABEL_SPARK_NAME, SPARK_LABEL_SELECTOR},
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service},
};

/// The cluster side of a spark: submitting, removing and observing its objects.
#[async_trait]
pub trait SparkCluster: Send + Sync {
    async fn create_resource(&self, resource: BundleResource) -> Result<(), client::Error>;

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Deletion, client::Error>;

    /// Spark names taken from the label of every spark workload.
    async fn list_spark_names(&self) -> Result<Vec<String>, client::Error>;

    /// `None` when the workload does not exist.
    async fn workload_ready_replicas(&self, spark: &str) -> Result<Option<i32>, client::Error>;

    async fn pod_phases(&self, spark: &str) -> Result<Vec<String>, client::Error>;
}

pub struct KubeSparkCluster {
    client: Client,
}

impl KubeSparkCluster {
    pub fn new(client: Client) -> Self {
        KubeSparkCluster { client }
    }
}

#[async_trait]
impl SparkCluster for KubeSparkCluster {
    async fn create_resource(&self, resource: BundleResource) -> Result<(), client::Error> {
        match resource {
            BundleResource::ConfigMap(o) => self.client.create(&o).await.map(drop),
            BundleResource::Secret(o) => self.client.create(&o).await.map(drop),
            BundleResource::PersistentVolumeClaim(o) => self.client.create(&o).await.map(drop),
            BundleResource::Service(o) => self.client.create(&o).await.map(drop),
            BundleResource::Deployment(o) => self.client.create(&o).await.map(drop),
        }
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Deletion, client::Error> {
        match kind {
            ResourceKind::ConfigMap => self.client.delete::<ConfigMap>(name).await,
            ResourceKind::Secret => self.client.delete::<Secret>(name).await,
            ResourceKind::PersistentVolumeClaim => {
                self.client.delete::<PersistentVolumeClaim>(name).await
            }
            ResourceKind::Service => self.client.delete::<Service>(name).await,
            ResourceKind::Deployment => self.client.delete::<Deployment>(name).await,
        }
    }

    async fn list_spark_names(&self) -> Result<Vec<String>, client::Error> {
        let deployments = self.client.list::<Deployment>(SPARK_LABEL_SELECTOR).await?;
        Ok(deployments
            .into_iter()
            .filter_map(|deployment| {
                deployment
                    .metadata
                    .labels
                    .and_then(|mut labels| labels.remove(LABEL_SPARK_NAME))
            })
            .collect())
    }

    async fn workload_ready_replicas(&self, spark: &str) -> Result<Option<i32>, client::Error> {
        let deployment = self.client.get_opt::<Deployment>(spark).await?;
        Ok(deployment.map(|deployment| {
            deployment
                .status
                .and_then(|status| status.ready_replicas)
                .unwrap_or(0)
        }))
    }

    async fn pod_phases(&self, spark: &str) -> Result<Vec<String>, client::Error> {
        let pods = self.client.list::<Pod>(&spark_selector(spark)).await?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.status.and_then(|status| status.phase))
            .collect())
    }
}
