use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::{ModuleRegistry, RegistryError};
use crate::config::toml_to_json;
use crate::modules;

pub(crate) const PACKAGE_MANIFEST_FILE: &str = "module.toml";

/// Package manifest for an installable module or reporter. A package is
/// picked up by the module scan only with a truthy `dexit_module` marker and
/// by the reporter scan only with a truthy `dexit_reporter` marker;
/// everything else in the directory is ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PackageManifest {
    #[serde(default)]
    pub(crate) dexit_module: bool,
    #[serde(default)]
    pub(crate) dexit_reporter: bool,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) provider: Option<String>,
    #[serde(default)]
    pub(crate) defaults: Option<toml::Value>,
    #[serde(default)]
    pub(crate) options: Option<toml::Value>,
}

pub(super) fn load_packages(
    registry: &mut ModuleRegistry,
    path: &Path,
) -> Result<usize, RegistryError> {
    if !path.is_dir() {
        return Err(RegistryError::ModulesDirMissing {
            path: path.to_path_buf(),
        });
    }

    let mut loaded = 0;
    for (package, manifest_path) in
        manifest_paths(path).map_err(|(path, error)| RegistryError::PackageManifestRead {
            path,
            error,
        })?
    {
        let source = fs::read_to_string(&manifest_path).map_err(|error| {
            RegistryError::PackageManifestRead {
                path: manifest_path.clone(),
                error,
            }
        })?;
        let manifest: PackageManifest =
            toml::from_str(&source).map_err(|error| RegistryError::PackageManifestParse {
                path: manifest_path.clone(),
                error,
            })?;
        if !manifest.dexit_module {
            continue;
        }

        let Some(provider) = manifest.provider.as_deref() else {
            return Err(RegistryError::PackageProviderMissing {
                package,
                path: manifest_path,
            });
        };
        // Native code cannot be loaded from a package directory the way a
        // scripting runtime would; the provider key selects a compiled-in
        // module factory instead.
        let Some(factory) = modules::provider(provider) else {
            return Err(RegistryError::UnknownProvider {
                package,
                provider: provider.to_owned(),
                available: modules::provider_names(),
            });
        };

        let mut module = factory();
        if let Some(name) = manifest.name {
            module.name = name;
        }
        if let Some(defaults) = manifest.defaults {
            match toml_to_json(defaults) {
                Value::Object(defaults) => module.defaults = defaults,
                _ => {
                    return Err(RegistryError::PackageDefaultsNotTable {
                        package,
                        path: manifest_path,
                    })
                }
            }
        }
        tracing::debug!(package = %package, module = %module.name, "loading module package");
        registry.register(module)?;
        loaded += 1;
    }
    Ok(loaded)
}

/// Package directories under `path` that carry a package manifest, sorted by
/// package name for deterministic registration order.
pub(crate) fn manifest_paths(
    path: &Path,
) -> Result<Vec<(String, PathBuf)>, (PathBuf, std::io::Error)> {
    let entries = fs::read_dir(path).map_err(|error| (path.to_path_buf(), error))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| (path.to_path_buf(), error))?;
        let package_dir = entry.path();
        if !package_dir.is_dir() {
            continue;
        }
        let manifest_path = package_dir.join(PACKAGE_MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        let package = package_dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .unwrap_or_else(|| "package".to_owned());
        found.push((package, manifest_path));
    }
    found.sort();
    Ok(found)
}
