#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;

pub use self::config::Config;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mesh_policy_core::{
    relation::{encode_policies, Databag},
    MeshType, ProviderAppData,
};
use mesh_policy_k8s_api::{labels::Map, Client};
use mesh_policy_k8s_reconcile::{LabelReconciler, PolicyResourceManager};
use mesh_policy_k8s_translate::{IstioTranslator, Registry};
use std::{io, path::PathBuf};
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "mesh-policy", about = "Service mesh access policy reconciler", version)]
pub struct Args {
    #[clap(long, default_value = "mesh_policy=info,warn", env = "MESH_POLICY_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// The trust domain of workload identities.
    #[clap(long, default_value = "cluster.local")]
    identity_domain: String,

    /// The field manager recorded on applied objects.
    #[clap(long, default_value = "mesh-policy")]
    field_manager: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the resolved policies and the objects that implement them.
    Render {
        #[clap(long)]
        config: PathBuf,
    },

    /// Converges the cluster's policy objects with the configured policies.
    Reconcile {
        #[clap(long)]
        config: PathBuf,
    },

    /// Deletes every policy object managed for the configured application.
    Delete {
        #[clap(long)]
        config: PathBuf,
    },

    /// Sets the labels that place an application on the mesh.
    Labels {
        #[clap(long)]
        app: String,

        #[clap(long, short = 'n')]
        namespace: String,

        /// A label to set, as `key=value`.
        #[clap(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,

        /// A YAML file holding the mesh provider's databag, whose labels are set as well.
        #[clap(long)]
        provider_data: Option<PathBuf>,
    },

    /// Removes every managed label from an application.
    Unlabel {
        #[clap(long)]
        app: String,

        #[clap(long, short = 'n')]
        namespace: String,
    },
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            identity_domain,
            field_manager,
            command,
        } = self;

        log_format.try_init(log_level)?;

        let registry =
            Registry::empty().with(MeshType::Istio, IstioTranslator::new(identity_domain));

        match command {
            Command::Render { config } => {
                let config = Config::read(&config)?;
                render(&config, &registry, &mut io::stdout().lock())
            }

            Command::Reconcile { config } => {
                let config = Config::read(&config)?;
                let policies = config.mesh_policies()?;
                let client = client.try_client().await?;
                policy_manager(client, &config, registry, field_manager)
                    .reconcile(
                        &policies,
                        config.mesh,
                        config.raw.clone(),
                        config.force,
                        config.ignore_missing,
                    )
                    .await?;
                info!(
                    app = %config.app,
                    namespace = %config.namespace,
                    policies = policies.len(),
                    "Reconciled policies",
                );
                Ok(())
            }

            Command::Delete { config } => {
                let config = Config::read(&config)?;
                let client = client.try_client().await?;
                policy_manager(client, &config, registry, field_manager)
                    .delete(config.ignore_missing)
                    .await?;
                info!(app = %config.app, namespace = %config.namespace, "Deleted policies");
                Ok(())
            }

            Command::Labels {
                app,
                namespace,
                labels,
                provider_data,
            } => {
                let mut requested = Map::new();
                if let Some(path) = provider_data {
                    match read_provider_data(&path)? {
                        Some(data) => requested.extend(data.labels),
                        None => info!("Mesh provider has not published any data"),
                    }
                }
                requested.extend(labels);

                let client = client.try_client().await?;
                LabelReconciler::new(client, &app, &namespace)
                    .reconcile(&requested)
                    .await?;
                info!(%app, %namespace, labels = ?requested, "Reconciled labels");
                Ok(())
            }

            Command::Unlabel { app, namespace } => {
                let client = client.try_client().await?;
                LabelReconciler::new(client, &app, &namespace)
                    .clear()
                    .await?;
                info!(%app, %namespace, "Removed managed labels");
                Ok(())
            }
        }
    }
}

fn policy_manager(
    client: Client,
    config: &Config,
    registry: Registry,
    field_manager: String,
) -> PolicyResourceManager<Client> {
    PolicyResourceManager::new(
        client,
        config.identity(),
        registry,
        config.manager_labels(),
        field_manager,
    )
}

/// Writes the published `policies` value followed by the translated objects as YAML
/// documents.
fn render(config: &Config, registry: &Registry, out: &mut impl io::Write) -> Result<()> {
    let policies = config.mesh_policies()?;
    let mut objects = registry.build(config.mesh, &config.identity(), &policies)?;
    objects.extend(config.raw.iter().cloned());

    writeln!(out, "# policies: {}", encode_policies(&policies)?)?;
    for obj in &objects {
        writeln!(out, "---")?;
        serde_yaml::to_writer(&mut *out, obj)?;
    }
    Ok(())
}

fn read_provider_data(path: &std::path::Path) -> Result<Option<ProviderAppData>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let databag: Databag = serde_yaml::from_reader(file)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(ProviderAppData::from_databag(&databag)?)
}

fn parse_label(s: &str) -> Result<(String, String)> {
    let Some((k, v)) = s.split_once('=') else {
        bail!("invalid label {s:?}: expected key=value");
    };
    if k.is_empty() {
        bail!("invalid label {s:?}: empty key");
    }
    Ok((k.to_string(), v.to_string()))
}
