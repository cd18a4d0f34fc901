use miette::{Result, miette};
use quire_repo::RepoConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    pub repo: RepoSection,
    pub listing: RepoConfig,
}

#[derive(Debug, Clone)]
pub struct RepoSection {
    pub did: String,
    /// CAR file holding every block
    pub store: PathBuf,
    /// Hex-encoded secp256k1 secret key
    pub key: PathBuf,
}

impl Config {
    pub fn from_kdl(text: &str) -> Result<Self> {
        let doc = text
            .parse::<kdl::KdlDocument>()
            .map_err(|e| miette!("Failed to parse KDL: {}", e))?;

        let mut repo: Option<RepoSection> = None;
        let mut listing: Option<RepoConfig> = None;

        for node in doc.nodes() {
            match node.name().value() {
                "repo" => {
                    if repo.is_some() {
                        return Err(miette!("Multiple repo blocks found"));
                    }
                    repo = Some(parse_repo(node)?);
                }
                "listing" => {
                    if listing.is_some() {
                        return Err(miette!("Multiple listing blocks found"));
                    }
                    listing = Some(parse_listing(node)?);
                }
                other => {
                    return Err(miette!("Unknown config node: {}", other));
                }
            }
        }

        Ok(Config {
            repo: repo.ok_or_else(|| miette!("Missing repo block"))?,
            listing: listing.unwrap_or_default(),
        })
    }

    /// Resolve relative paths against the directory holding the config file
    pub fn relative_to(mut self, base: &Path) -> Self {
        if self.repo.store.is_relative() {
            self.repo.store = base.join(&self.repo.store);
        }
        if self.repo.key.is_relative() {
            self.repo.key = base.join(&self.repo.key);
        }
        self
    }
}

fn string_arg<'a>(node: &'a kdl::KdlNode, field: &str) -> Result<&'a str> {
    node.entries()
        .get(0)
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| miette!("{} expects a string value", field))
}

fn limit_arg(node: &kdl::KdlNode, field: &str) -> Result<usize> {
    let val = node
        .entries()
        .get(0)
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| miette!("{} expects an integer value", field))?;
    match usize::try_from(val) {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(miette!("{} must be a positive integer, got {}", field, val)),
    }
}

fn parse_repo(node: &kdl::KdlNode) -> Result<RepoSection> {
    let children = node
        .children()
        .ok_or_else(|| miette!("repo block has no children"))?;

    let mut did: Option<String> = None;
    let mut store: Option<PathBuf> = None;
    let mut key: Option<PathBuf> = None;

    for child in children.nodes() {
        match child.name().value() {
            "did" => did = Some(string_arg(child, "did")?.to_string()),
            "store" => store = Some(PathBuf::from(string_arg(child, "store")?)),
            "key" => key = Some(PathBuf::from(string_arg(child, "key")?)),
            other => {
                return Err(miette!("Unknown repo field: {}", other));
            }
        }
    }

    let did = did.ok_or_else(|| miette!("Missing did"))?;
    if !did.starts_with("did:") {
        return Err(miette!("did must start with \"did:\", got {}", did));
    }

    Ok(RepoSection {
        did,
        store: store.unwrap_or_else(|| PathBuf::from("quire.car")),
        key: key.unwrap_or_else(|| PathBuf::from("quire.key")),
    })
}

fn parse_listing(node: &kdl::KdlNode) -> Result<RepoConfig> {
    let mut config = RepoConfig::default();
    let Some(children) = node.children() else {
        return Ok(config);
    };

    for child in children.nodes() {
        match child.name().value() {
            "default-limit" => config.default_list_limit = limit_arg(child, "default-limit")?,
            "max-limit" => config.max_list_limit = limit_arg(child, "max-limit")?,
            other => {
                return Err(miette!("Unknown listing field: {}", other));
            }
        }
    }

    if config.default_list_limit > config.max_list_limit {
        return Err(miette!(
            "default-limit {} exceeds max-limit {}",
            config.default_list_limit,
            config.max_list_limit
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = Config::from_kdl(
            r#"
            repo {
                did "did:example:alice"
                store "data/alice.car"
                key "alice.key"
            }
            listing {
                default-limit 20
                max-limit 200
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.repo.did, "did:example:alice");
        assert_eq!(config.repo.store, PathBuf::from("data/alice.car"));
        assert_eq!(config.listing.default_list_limit, 20);
        assert_eq!(config.listing.max_list_limit, 200);

        let config = config.relative_to(Path::new("/srv/quire"));
        assert_eq!(config.repo.key, PathBuf::from("/srv/quire/alice.key"));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_kdl(r#"repo { did "did:example:bob"; }"#).unwrap();
        assert_eq!(config.repo.store, PathBuf::from("quire.car"));
        assert_eq!(config.repo.key, PathBuf::from("quire.key"));
        assert_eq!(config.listing.max_list_limit, 100);
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(Config::from_kdl("listing { max-limit 10; }").is_err());
        assert!(Config::from_kdl(r#"repo { did "alice"; }"#).is_err());
        assert!(Config::from_kdl(r#"repo { did "did:example:a"; colour "red"; }"#).is_err());
        assert!(
            Config::from_kdl(r#"repo { did "did:example:a"; } listing { max-limit 0; }"#).is_err()
        );
        assert!(
            Config::from_kdl(
                r#"repo { did "did:example:a"; } listing { default-limit 50; max-limit 10; }"#
            )
            .is_err()
        );
    }
}
