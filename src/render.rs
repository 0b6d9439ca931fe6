use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use clap::Parser;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    autoscaling::v2::HorizontalPodAutoscaler,
};

use hpa_operator::{
    config::{AnnotationArgs, LogFormat, init_tracing},
    error::Error,
    workload::{Workload, WorkloadRef},
};

/// Prints the HorizontalPodAutoscaler a Deployment or StatefulSet manifest would get.
#[derive(Debug, Parser)]
#[command(name = "hpa-render", version)]
struct Cli {
    /// Manifest to read, stdin when omitted.
    file: Option<PathBuf>,

    #[command(flatten)]
    annotations: AnnotationArgs,
}

fn read_manifest(file: Option<&Path>) -> Result<String, Error> {
    match file {
        Some(path) => Ok(fs::read_to_string(path)?),
        None => {
            let mut manifest = String::new();
            io::stdin().read_to_string(&mut manifest)?;
            Ok(manifest)
        }
    }
}

/// Fills in what the API server would assign to a stored object. The uid stays empty.
fn as_stored<K: Workload>(mut workload: K) -> K {
    let meta = workload.meta_mut();
    meta.namespace.get_or_insert_with(|| "default".to_string());
    meta.uid.get_or_insert_with(String::new);
    workload
}

fn workload_ref(manifest: &str) -> Result<WorkloadRef, Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(manifest)?;
    let kind = value
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "Deployment" => as_stored(serde_yaml::from_value::<Deployment>(value)?).workload_ref(),
        "StatefulSet" => as_stored(serde_yaml::from_value::<StatefulSet>(value)?).workload_ref(),
        _ => Err(Error::UnsupportedKind(kind)),
    }
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_tracing(LogFormat::Text, "error");

    let synthesizer = cli.annotations.synthesizer()?;
    let workload = workload_ref(&read_manifest(cli.file.as_deref())?)?;

    let Some((source, annotations)) = synthesizer.select_annotations(&workload) else {
        eprintln!(
            "{} {}: no autoscaling annotations found",
            workload.kind, workload.name
        );
        return Ok(());
    };
    eprintln!(
        "{} {}: using annotations of the {source}",
        workload.kind, workload.name
    );

    let parsed = synthesizer.synthesize(&workload, &annotations);
    for rejection in &parsed.rejected {
        eprintln!("ignored {}: {}", rejection.key, rejection.reason);
    }

    match parsed.value {
        Some(desired) => {
            let hpa = serde_yaml::to_string(&HorizontalPodAutoscaler::from(&desired))?;
            println!("{hpa}");
        }
        None => eprintln!("no autoscaler would be created"),
    }

    Ok(())
}
