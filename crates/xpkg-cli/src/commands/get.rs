//! Get command - list packages or revisions in the cluster

use chrono::Utc;
use clap::ValueEnum;
use console::style;
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use xpkg_core::PackageKind;
use xpkg_kube::{
    Configuration, ConfigurationRevision, Package, PackageRevision, Provider, ProviderRevision,
};

use crate::display::{Table, package_table, revision_table};
use crate::error::{CliError, Result};

/// What to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Target {
    Packages,
    Revisions,
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Output {
    #[default]
    Table,
    Json,
}

async fn list<K>(client: &Client, wanted: bool) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    if !wanted {
        return Ok(Vec::new());
    }
    let items = Api::<K>::all(client.clone())
        .list(&ListParams::default())
        .await?
        .items;
    Ok(items)
}

fn print_json<T: Serialize>(items: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(items)
        .map_err(|e| CliError::internal(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

/// Run the get command; `kind` restricts the listing to one package kind
pub async fn run(target: Target, kind: Option<PackageKind>, output: Output) -> Result<()> {
    let client = Client::try_default().await?;
    let providers = kind.is_none_or(|k| k == PackageKind::Provider);
    let configurations = kind.is_none_or(|k| k == PackageKind::Configuration);

    match target {
        Target::Packages => {
            let p: Vec<Provider> = list(&client, providers).await?;
            let c: Vec<Configuration> = list(&client, configurations).await?;
            tracing::debug!(providers = p.len(), configurations = c.len(), "listed packages");

            if output == Output::Json {
                return print_json(&serde_json::json!({ "providers": p, "configurations": c }));
            }
            let rows = p
                .iter()
                .map(|x| x as &dyn Package)
                .chain(c.iter().map(|x| x as &dyn Package));
            print_table(package_table(rows, Utc::now()), "packages");
        }
        Target::Revisions => {
            let p: Vec<ProviderRevision> = list(&client, providers).await?;
            let c: Vec<ConfigurationRevision> = list(&client, configurations).await?;
            tracing::debug!(providers = p.len(), configurations = c.len(), "listed revisions");

            if output == Output::Json {
                return print_json(&serde_json::json!({
                    "providerRevisions": p,
                    "configurationRevisions": c,
                }));
            }
            let rows = p
                .iter()
                .map(|x| x as &dyn PackageRevision)
                .chain(c.iter().map(|x| x as &dyn PackageRevision));
            print_table(revision_table(rows, Utc::now()), "revisions");
        }
    }
    Ok(())
}

fn print_table(table: Table, what: &str) {
    if table.is_empty() {
        println!("{}", style(format!("No {} found", what)).dim());
        return;
    }
    println!("{}", table.render());
}
