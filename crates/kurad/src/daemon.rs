//! Component wiring: one cloud connection, its publishers and subscribers,
//! and the gateway applications bound to them.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use kura_cloud::{CloudConnection, CloudPublisher, CloudSubscriber, Publisher, SubscriberListener};
use kura_core::RequestHandler;
use kura_gateway::{
    create_device, AssetHandler, AssetsConfig, CanGateway, Heater, InMemoryAssetCatalog,
    SerialGateway,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;

pub struct Daemon {
    connection: Arc<CloudConnection>,
    publishers: HashMap<String, Arc<CloudPublisher>>,
    subscribers: HashMap<String, Arc<CloudSubscriber>>,
    can: Option<Arc<CanGateway>>,
    serial: Option<Arc<SerialGateway>>,
    heater: Option<Arc<Heater>>,
    /// Handler id the asset handler is registered under
    assets_id: Mutex<Option<String>>,
}

impl Daemon {
    /// Build every configured component; nothing is started yet
    pub fn build(config: &DaemonConfig) -> anyhow::Result<Self> {
        let connection = CloudConnection::from_config(&config.connection)
            .context("Failed to create cloud connection")?;

        let mut publishers = HashMap::new();
        for entry in &config.publishers {
            let publisher = Arc::new(CloudPublisher::new(&entry.name, entry.options.clone()));
            publisher.bind(connection.clone());
            if publishers.insert(entry.name.clone(), publisher).is_some() {
                bail!("Duplicate publisher '{}'", entry.name);
            }
        }

        let mut subscribers = HashMap::new();
        for entry in &config.subscribers {
            let subscriber = CloudSubscriber::new(&entry.name, entry.options.clone());
            if subscribers.insert(entry.name.clone(), subscriber).is_some() {
                bail!("Duplicate subscriber '{}'", entry.name);
            }
        }

        let mut daemon = Self {
            connection,
            publishers,
            subscribers,
            can: None,
            serial: None,
            heater: None,
            assets_id: Mutex::new(None),
        };

        if let Some(section) = &config.can_gateway {
            let device = create_device(&section.gateway.device)?;
            let gateway = Arc::new(CanGateway::new(device, section.gateway.clone()));
            for publisher in daemon.lookup_publishers(&section.publishers)? {
                gateway.add_publisher(publisher);
            }
            daemon.attach_downlink(section.subscriber.as_deref(), gateway.clone())?;
            daemon.can = Some(gateway);
        }

        if let Some(section) = &config.serial_gateway {
            let device = create_device(&section.gateway.device)?;
            let gateway = Arc::new(SerialGateway::new(device, section.gateway.clone()));
            for publisher in daemon.lookup_publishers(&section.publishers)? {
                gateway.add_publisher(publisher);
            }
            daemon.attach_downlink(section.subscriber.as_deref(), gateway.clone())?;
            daemon.serial = Some(gateway);
        }

        if let Some(section) = &config.heater {
            let heater = Arc::new(Heater::new(section.heater.clone()));
            for publisher in daemon.lookup_publishers(&section.publishers)? {
                heater.add_publisher(publisher);
            }
            daemon
                .connection
                .router()
                .register(heater.id(), heater.clone())?;
            daemon.heater = Some(heater);
        }

        if let Some(assets) = &config.assets {
            let id = register_assets(&daemon.connection, assets)?;
            *daemon.assets_id.get_mut() = Some(id);
        }

        Ok(daemon)
    }

    pub fn connection(&self) -> &Arc<CloudConnection> {
        &self.connection
    }

    /// Connect, bind subscribers and start every application
    pub async fn start(&self) -> anyhow::Result<()> {
        self.connection
            .connect()
            .await
            .context("Failed to connect")?;

        for subscriber in self.subscribers.values() {
            subscriber.bind(self.connection.clone()).await;
        }
        if let Some(can) = &self.can {
            can.activate().await.context("Failed to activate CAN gateway")?;
        }
        if let Some(serial) = &self.serial {
            serial
                .activate()
                .await
                .context("Failed to activate serial gateway")?;
        }
        if let Some(heater) = &self.heater {
            heater.start().await?;
        }

        info!(
            connection = %self.connection.name(),
            handlers = ?self.connection.router().handler_ids(),
            "Daemon started"
        );
        Ok(())
    }

    /// Apply a re-read configuration to the running components
    ///
    /// Components are updated in place. Adding or removing publishers,
    /// subscribers or gateways needs a restart and is only reported.
    pub async fn reconfigure(&self, config: &DaemonConfig) {
        for entry in &config.publishers {
            match self.publishers.get(&entry.name) {
                Some(publisher) => publisher.update(entry.options.clone()),
                None => warn!(publisher = %entry.name, "New publisher ignored until restart"),
            }
        }

        for entry in &config.subscribers {
            match self.subscribers.get(&entry.name) {
                Some(subscriber) => {
                    if let Err(e) = subscriber.update(entry.options.clone()).await {
                        error!(subscriber = %entry.name, error = %e, "Subscriber update failed");
                    }
                }
                None => warn!(subscriber = %entry.name, "New subscriber ignored until restart"),
            }
        }

        match (&self.can, &config.can_gateway) {
            (Some(can), Some(section)) => {
                if let Err(e) = can.reconfigure(section.gateway.clone()).await {
                    error!(error = %e, "CAN gateway reconfiguration failed");
                }
            }
            (None, None) => {}
            _ => warn!("Enabling or disabling the CAN gateway needs a restart"),
        }

        match (&self.serial, &config.serial_gateway) {
            (Some(serial), Some(section)) => {
                if let Err(e) = serial.reconfigure(section.gateway.clone()).await {
                    error!(error = %e, "Serial gateway reconfiguration failed");
                }
            }
            (None, None) => {}
            _ => warn!("Enabling or disabling the serial gateway needs a restart"),
        }

        match (&self.heater, &config.heater) {
            (Some(heater), Some(section)) => {
                if let Err(e) = heater.reconfigure(section.heater.clone()).await {
                    error!(error = %e, "Heater reconfiguration failed");
                }
            }
            (None, None) => {}
            _ => warn!("Enabling or disabling the heater needs a restart"),
        }

        let mut assets_id = self.assets_id.lock().await;
        if let Some(old) = assets_id.take() {
            self.connection.router().unregister(&old);
        }
        if let Some(assets) = &config.assets {
            match register_assets(&self.connection, assets) {
                Ok(id) => *assets_id = Some(id),
                Err(e) => error!(error = %e, "Asset handler registration failed"),
            }
        }

        info!("Configuration applied");
    }

    /// Stop applications, release bindings and disconnect
    pub async fn shutdown(&self) {
        if let Some(heater) = &self.heater {
            heater.stop().await;
        }
        if let Some(can) = &self.can {
            if let Err(e) = can.deactivate().await {
                warn!(error = %e, "CAN gateway deactivation failed");
            }
        }
        if let Some(serial) = &self.serial {
            if let Err(e) = serial.deactivate().await {
                warn!(error = %e, "Serial gateway deactivation failed");
            }
        }
        for subscriber in self.subscribers.values() {
            subscriber.unbind().await;
        }
        for publisher in self.publishers.values() {
            publisher.unbind();
        }
        self.connection.shutdown().await;
        info!("Daemon stopped");
    }

    fn lookup_publishers(&self, names: &[String]) -> anyhow::Result<Vec<Arc<dyn Publisher>>> {
        names
            .iter()
            .map(|name| {
                self.publishers
                    .get(name)
                    .map(|p| p.clone() as Arc<dyn Publisher>)
                    .with_context(|| format!("Unknown publisher '{}'", name))
            })
            .collect()
    }

    fn attach_downlink(
        &self,
        subscriber: Option<&str>,
        listener: Arc<dyn SubscriberListener>,
    ) -> anyhow::Result<()> {
        let Some(name) = subscriber else {
            return Ok(());
        };
        let subscriber = self
            .subscribers
            .get(name)
            .with_context(|| format!("Unknown subscriber '{}'", name))?;
        subscriber.register(listener);
        Ok(())
    }
}

fn register_assets(connection: &CloudConnection, config: &AssetsConfig) -> anyhow::Result<String> {
    let catalog = Arc::new(InMemoryAssetCatalog::new(&config.assets));
    let handler: Arc<dyn RequestHandler> = Arc::new(AssetHandler::new(catalog));
    connection.router().register(config.id.clone(), handler)?;
    Ok(config.id.clone())
}
