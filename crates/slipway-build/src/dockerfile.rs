use std::path::Path;

use crate::pipeline::{BuildTarget, ImageDefinition};

/// Renders an [`ImageDefinition`] as a multi-stage Dockerfile.
///
/// Stage layout:
/// - `builder`: build tooling + source snapshot, produces one wheel
/// - `runtime`: minimal base, system libraries, wheel installed from a
///   read-only bind mount of the builder's artifact directory, so it never
///   lands in a layer
/// - `release`: `FROM runtime`, identity created, `USER` switched, entry point
pub struct DockerfileGenerator<'a> {
    image: &'a ImageDefinition,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(image: &'a ImageDefinition) -> Self {
        Self { image }
    }

    pub fn render(&self) -> String {
        let image = self.image;
        let builder = &image.builder;
        let runtime = &image.runtime;
        let transfer = &image.transfer;
        let installer = &image.installer;
        let identity = &image.identity;

        let system_packages = if runtime.system_packages.is_empty() {
            String::new()
        } else {
            format!(
                "RUN apt-get update \\\n \
                 && apt-get install -y --no-install-recommends {} \\\n \
                 && rm -rf /var/lib/apt/lists/*\n",
                runtime.system_packages.join(" ")
            )
        };

        let labels: String = image
            .release_labels()
            .iter()
            .map(|(key, value)| format!("LABEL {}={}\n", json_string(key), json_string(value)))
            .collect();

        format!(
            r#"# syntax=docker/dockerfile:1
# === Stage 1: Builder ===
FROM {builder_image} AS {builder_stage}
RUN {python} -m pip install --no-cache-dir {tool}=={tool_version}
WORKDIR /build/src
COPY . .
RUN {python} -m {tool} --wheel --outdir {artifact_dir} . \
 && test "$(find {artifact_dir} -maxdepth 1 -name '*.whl' | wc -l)" -eq 1

# === Stage 2: Runtime ===
FROM {runtime_image} AS {runtime_stage}
{system_packages}RUN --mount=type=bind,from={transfer_from},source={artifact_dir_raw},target={staging_dir} \
    {python} -m pip install --no-cache-dir {staged}

# === Stage 3: Release ===
FROM {runtime_stage} AS {release_stage}
{labels}RUN (getent group {name} >/dev/null || groupadd --system --gid {gid} {name}) \
 && (id -u {name} >/dev/null 2>&1 || useradd --system --uid {uid} --gid {gid} --no-create-home --shell /usr/sbin/nologin {name}) \
 && mkdir -p {app_root} {log_dir} \
 && chown -R {user} {app_root} {log_dir}
USER {user}
WORKDIR {workdir}
ENTRYPOINT {entry_point}
"#,
            builder_image = builder.image,
            builder_stage = BuildTarget::Builder,
            tool = builder.build_tool,
            tool_version = builder.build_tool_version,
            artifact_dir = shell_quote_path(&builder.artifact_dir),
            runtime_image = runtime.image,
            runtime_stage = BuildTarget::Runtime,
            system_packages = system_packages,
            transfer_from = transfer.from,
            artifact_dir_raw = transfer.artifact.dir().display(),
            staging_dir = transfer.staging_dir.display(),
            python = installer.python,
            staged = transfer.staged_pattern(),
            release_stage = BuildTarget::Release,
            labels = labels,
            name = identity.name(),
            uid = identity.uid(),
            gid = identity.gid(),
            user = identity.user_spec(),
            app_root = shell_quote_path(&image.paths.app_root),
            log_dir = shell_quote_path(&image.paths.log_dir),
            workdir = image.paths.app_root.display(),
            entry_point = json_array(image.entry_point.argv()),
        )
    }
}

/// Single-quote `path` for `sh` unless it only holds safe characters.
fn shell_quote_path(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '='));
    if safe {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

/// Exec-form argument list: `["python", "-m", "app.manage"]`.
fn json_array(argv: &[String]) -> String {
    let items: Vec<String> = argv.iter().map(|a| json_string(a)).collect();
    format!("[{}]", items.join(", "))
}
