use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};
use warden_core::error::{Result, WardenError};
use warden_core::instance::{GameServer, InstanceDescriptor, PortTriple};

use crate::cluster::InstanceStore;
use crate::upgrade::ServerSet;

/// Files copied from a template instance into a new one.
const TEMPLATE_FILES: [&str; 4] = [
    "autoexec.cfg",
    "serverSettings.lua",
    "options.lua",
    "network.vault",
];

const CONFIG_DIR: &str = "Config";

/// Game-server instances owned by this node.
///
/// Descriptors are persisted to a TOML file keyed by instance name and
/// mirrored into the shared `instances` table. Server handles are runtime
/// only.
pub struct InstanceRegistry {
    node: String,
    file: PathBuf,
    root: PathBuf,
    store: Arc<dyn InstanceStore>,
    instances: tokio::sync::Mutex<BTreeMap<String, InstanceDescriptor>>,
    servers: Mutex<HashMap<String, Arc<dyn GameServer>>>,
}

impl InstanceRegistry {
    /// Load the registry from `file`. A missing file is an empty registry.
    pub fn load(
        node: impl Into<String>,
        file: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        store: Arc<dyn InstanceStore>,
    ) -> Result<Self> {
        let file = file.into();
        let instances = if file.exists() {
            let content = std::fs::read_to_string(&file)?;
            toml::from_str(&content).map_err(|e| {
                WardenError::Config(format!("Failed to parse {}: {}", file.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            node: node.into(),
            file,
            root: root.into(),
            store,
            instances: tokio::sync::Mutex::new(instances),
            servers: Mutex::new(HashMap::new()),
        })
    }

    pub async fn instances(&self) -> BTreeMap<String, InstanceDescriptor> {
        self.instances.lock().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<InstanceDescriptor> {
        self.instances.lock().await.get(name).cloned()
    }

    /// Attach the live server object of an instance.
    pub fn attach(&self, instance: &str, server: Arc<dyn GameServer>) {
        self.servers_guard().insert(instance.to_string(), server);
    }

    fn servers_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn GameServer>>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, instances: &BTreeMap<String, InstanceDescriptor>) -> Result<()> {
        if let Some(parent) = self.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.file, toml::to_string_pretty(instances)?)?;
        Ok(())
    }

    /// Create a new instance with the next free port triple.
    ///
    /// With `template`, the template instance's configuration files are
    /// copied into the new home directory.
    pub async fn add_instance(
        &self,
        name: &str,
        template: Option<&str>,
    ) -> Result<InstanceDescriptor> {
        let mut instances = self.instances.lock().await;
        if instances.contains_key(name) {
            return Err(WardenError::InvalidArgument(format!(
                "Instance {} already exists",
                name
            )));
        }
        let template_home = match template {
            Some(template) => Some(
                instances
                    .get(template)
                    .map(|t| t.home.clone())
                    .ok_or_else(|| WardenError::NotFound(format!("Instance {}", template)))?,
            ),
            None => None,
        };

        let descriptor = InstanceDescriptor {
            home: self.root.join(name),
            ports: PortTriple::next_free(instances.values().map(|i| &i.ports)),
            server: None,
        };
        let config_dir = descriptor.home.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;
        if let Some(template_home) = template_home {
            copy_template(&template_home.join(CONFIG_DIR), &config_dir)?;
        }

        let mut updated = instances.clone();
        updated.insert(name.to_string(), descriptor.clone());
        self.persist(&updated)?;
        *instances = updated;

        self.store
            .upsert_instance(&self.node, name, descriptor.ports.bot_port, None)
            .await?;

        info!(
            instance = %name,
            bot_port = descriptor.ports.bot_port,
            game_port = descriptor.ports.game_port,
            webgui_port = descriptor.ports.webgui_port,
            "Instance added"
        );
        Ok(descriptor)
    }

    /// Remove an instance, optionally with its home directory.
    pub async fn delete_instance(&self, name: &str, remove_files: bool) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let mut updated = instances.clone();
        let descriptor = updated
            .remove(name)
            .ok_or_else(|| WardenError::NotFound(format!("Instance {}", name)))?;
        self.persist(&updated)?;
        *instances = updated;
        self.servers_guard().remove(name);

        self.store.delete_instance(&self.node, name).await?;

        if remove_files {
            if let Err(e) = std::fs::remove_dir_all(&descriptor.home) {
                warn!(home = %descriptor.home.display(), error = %e, "Could not remove instance files");
            }
        }
        info!(instance = %name, "Instance deleted");
        Ok(())
    }

    /// Rename an instance together with its home directory and store row.
    ///
    /// The directory is moved back if the store update fails.
    pub async fn rename_instance(&self, name: &str, new_name: &str) -> Result<()> {
        let mut instances = self.instances.lock().await;
        if instances.contains_key(new_name) {
            return Err(WardenError::InvalidArgument(format!(
                "Instance {} already exists",
                new_name
            )));
        }
        let mut descriptor = instances
            .get(name)
            .cloned()
            .ok_or_else(|| WardenError::NotFound(format!("Instance {}", name)))?;

        let old_home = descriptor.home.clone();
        let new_home = old_home
            .parent()
            .map(|parent| parent.join(new_name))
            .unwrap_or_else(|| PathBuf::from(new_name));
        std::fs::rename(&old_home, &new_home)?;

        if let Err(e) = self.store.rename_instance(&self.node, name, new_name).await {
            if let Err(undo) = std::fs::rename(&new_home, &old_home) {
                warn!(home = %new_home.display(), error = %undo, "Could not restore instance directory");
            }
            return Err(e.into());
        }

        descriptor.home = new_home;
        let mut updated = instances.clone();
        updated.remove(name);
        updated.insert(new_name.to_string(), descriptor);
        self.persist(&updated)?;
        *instances = updated;

        let mut servers = self.servers_guard();
        if let Some(server) = servers.remove(name) {
            servers.insert(new_name.to_string(), server);
        }
        info!(instance = %name, new_name = %new_name, "Instance renamed");
        Ok(())
    }

    /// Link `server` to `instance`, unlinking it from wherever it was before.
    pub async fn migrate_server(&self, server: Arc<dyn GameServer>, instance: &str) -> Result<()> {
        let server_name = server.name();
        let mut instances = self.instances.lock().await;
        if !instances.contains_key(instance) {
            return Err(WardenError::NotFound(format!("Instance {}", instance)));
        }

        let mut updated = instances.clone();
        let previous: Vec<String> = updated
            .iter()
            .filter(|(name, d)| {
                name.as_str() != instance && d.server.as_deref() == Some(server_name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &previous {
            if let Some(d) = updated.get_mut(name) {
                d.server = None;
            }
        }
        if let Some(d) = updated.get_mut(instance) {
            d.server = Some(server_name.clone());
        }
        self.persist(&updated)?;
        *instances = updated;

        {
            let mut servers = self.servers_guard();
            for name in &previous {
                servers.remove(name);
            }
            servers.insert(instance.to_string(), server);
        }

        for name in &previous {
            self.store.link_server(&self.node, name, None).await?;
        }
        self.store
            .link_server(&self.node, instance, Some(&server_name))
            .await?;
        info!(server = %server_name, instance = %instance, "Server migrated");
        Ok(())
    }

    /// Unlink the named server from its instance.
    pub async fn unregister_server(&self, server_name: &str) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .iter()
            .find(|(_, d)| d.server.as_deref() == Some(server_name))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| WardenError::NotFound(format!("Server {}", server_name)))?;

        let mut updated = instances.clone();
        if let Some(d) = updated.get_mut(&instance) {
            d.server = None;
        }
        self.persist(&updated)?;
        *instances = updated;
        self.servers_guard().remove(&instance);

        self.store.link_server(&self.node, &instance, None).await?;
        info!(server = %server_name, instance = %instance, "Server unregistered");
        Ok(())
    }

    /// Write every descriptor to the store. Run once at startup.
    pub async fn sync_store(&self) -> Result<()> {
        let instances = self.instances.lock().await;
        for (name, descriptor) in instances.iter() {
            self.store
                .upsert_instance(
                    &self.node,
                    name,
                    descriptor.ports.bot_port,
                    descriptor.server.as_deref(),
                )
                .await?;
        }
        Ok(())
    }
}

impl ServerSet for InstanceRegistry {
    fn servers(&self) -> Vec<Arc<dyn GameServer>> {
        self.servers_guard().values().cloned().collect()
    }
}

fn copy_template(from: &Path, to: &Path) -> Result<()> {
    for file in TEMPLATE_FILES {
        let source = from.join(file);
        if source.exists() {
            std::fs::copy(&source, to.join(file))?;
        }
    }
    Ok(())
}
