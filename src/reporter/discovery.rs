use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use super::{create_reporter, Broadcast, ReporterError};
use crate::config::toml_to_json;
use crate::registry::discovery::{manifest_paths, PackageManifest};
use crate::runner::context::deep_merge;

/// Scans the same package directory as module discovery, picking up only
/// packages carrying the `dexit_reporter` marker. The provider key selects a
/// compiled-in reporter factory; the constructor receives the package's
/// `[options]` table with the run configuration's entry for the reporter
/// name merged over it.
pub(super) fn load_packages(
    broadcast: &mut Broadcast,
    path: &Path,
    options: &IndexMap<String, Value>,
) -> Result<Vec<String>, ReporterError> {
    if !path.is_dir() {
        return Err(ReporterError::PackagesDirMissing {
            path: path.to_path_buf(),
        });
    }

    let mut loaded = Vec::new();
    for (package, manifest_path) in
        manifest_paths(path).map_err(|(path, error)| ReporterError::PackageManifestRead {
            path,
            error,
        })?
    {
        let source = fs::read_to_string(&manifest_path).map_err(|error| {
            ReporterError::PackageManifestRead {
                path: manifest_path.clone(),
                error,
            }
        })?;
        let manifest: PackageManifest =
            toml::from_str(&source).map_err(|error| ReporterError::PackageManifestParse {
                path: manifest_path.clone(),
                error,
            })?;
        if !manifest.dexit_reporter {
            continue;
        }

        let name = manifest.name.unwrap_or_else(|| package.clone());
        let Some(provider) = manifest.provider.as_deref() else {
            return Err(ReporterError::PackageProviderMissing {
                package,
                path: manifest_path,
            });
        };

        let mut reporter_options = match manifest.options {
            Some(options) => match toml_to_json(options) {
                table @ Value::Object(_) => table,
                _ => {
                    return Err(ReporterError::PackageOptionsNotTable {
                        package,
                        path: manifest_path,
                    })
                }
            },
            None => Value::Object(Default::default()),
        };
        if let Some(configured) = options.get(&name) {
            reporter_options = deep_merge(reporter_options, configured.clone());
        }

        tracing::debug!(package = %package, reporter = %name, "loading reporter package");
        broadcast.register(create_reporter(provider, &reporter_options)?);
        loaded.push(name);
    }
    Ok(loaded)
}
