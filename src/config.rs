use tracing_subscriber::EnvFilter;

use crate::{
    annotations::{AnnotationNames, DEFAULT_DOMAIN, SchemaVersion},
    error::Error,
    synthesizer::Synthesizer,
};

#[derive(Debug, clap::Parser)]
#[command(
    name = "hpa-operator",
    version,
    about = "Maintains HorizontalPodAutoscalers from Deployment and StatefulSet annotations"
)]
pub struct Cli {
    /// Only watch workloads in this namespace. All namespaces are watched when unset.
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[command(flatten)]
    pub annotations: AnnotationArgs,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

#[derive(Debug, clap::Args)]
pub struct AnnotationArgs {
    /// Reserved domain of the autoscaling annotations.
    #[arg(long, env = "HPA_ANNOTATION_DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub annotation_domain: String,

    /// Annotation key convention.
    #[arg(long, env = "HPA_SCHEMA_VERSION", value_enum, default_value_t)]
    pub schema_version: SchemaVersion,
}

impl AnnotationArgs {
    pub fn synthesizer(&self) -> Result<Synthesizer, Error> {
        let names = AnnotationNames::with_domain(&self.annotation_domain);
        Ok(Synthesizer::new(self.schema_version.schema(names)?))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides `default_directive`.
pub fn init_tracing(format: LogFormat, default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
