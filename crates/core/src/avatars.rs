//! Contributor avatar resolution.
//!
//! Gource picks up per-user images from a directory of `{username}.{ext}`
//! files. Avatars come from two registries, project-scoped and global,
//! and each record may carry aliases for contributors who commit under
//! several names.
//!
//! Precedence, highest first:
//!
//! 1. project avatar whose name equals the contributor
//! 2. project avatar with a matching alias
//! 3. global avatar whose name equals the contributor
//! 4. global avatar with a matching alias
//!
//! A record without an image is ignored entirely.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::types::DbId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarScope {
    Project,
    Global,
}

/// An avatar record as loaded from either registry.
#[derive(Debug, Clone)]
pub struct AvatarRecord {
    pub id: DbId,
    pub name: String,
    /// Local path of the attached image, if any.
    pub image: Option<PathBuf>,
    pub aliases: Vec<String>,
}

/// The avatar chosen for one contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAvatar {
    pub image_path: PathBuf,
    pub scope: AvatarScope,
    pub avatar_id: DbId,
    /// The alias that matched, when the match was not on the record name.
    pub alias: Option<String>,
}

/// Resolve each contributor to its highest-precedence avatar.
///
/// Contributors without any candidate are absent from the result.
pub fn resolve_avatars<'a, I>(
    project_avatars: &[AvatarRecord],
    global_avatars: &[AvatarRecord],
    contributors: I,
) -> BTreeMap<String, ResolvedAvatar>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut resolved = BTreeMap::new();
    for contributor in contributors {
        let hit = find_by_name(project_avatars, contributor, AvatarScope::Project)
            .or_else(|| find_by_alias(project_avatars, contributor, AvatarScope::Project))
            .or_else(|| find_by_name(global_avatars, contributor, AvatarScope::Global))
            .or_else(|| find_by_alias(global_avatars, contributor, AvatarScope::Global));
        if let Some(avatar) = hit {
            resolved.insert(contributor.to_string(), avatar);
        }
    }
    resolved
}

fn find_by_name(records: &[AvatarRecord], name: &str, scope: AvatarScope) -> Option<ResolvedAvatar> {
    records.iter().find_map(|r| match &r.image {
        Some(image) if r.name == name => Some(ResolvedAvatar {
            image_path: image.clone(),
            scope,
            avatar_id: r.id,
            alias: None,
        }),
        _ => None,
    })
}

fn find_by_alias(records: &[AvatarRecord], name: &str, scope: AvatarScope) -> Option<ResolvedAvatar> {
    records.iter().find_map(|r| {
        let image = r.image.as_ref()?;
        let alias = r.aliases.iter().find(|a| a.as_str() == name)?;
        Some(ResolvedAvatar {
            image_path: image.clone(),
            scope,
            avatar_id: r.id,
            alias: Some(alias.clone()),
        })
    })
}

/// Populate `dir` with `{contributor}.{ext}` symlinks for gource's
/// `--user-image-dir`.
///
/// Contributors whose names cannot be used as a file name are skipped.
pub async fn link_avatar_dir(
    dir: &Path,
    avatars: &BTreeMap<String, ResolvedAvatar>,
) -> std::io::Result<usize> {
    tokio::fs::create_dir_all(dir).await?;
    let mut linked = 0;
    for (name, avatar) in avatars {
        if name.is_empty() || name.contains('/') || name.contains('\0') || name.starts_with('.') {
            tracing::debug!(contributor = %name, "Skipping avatar with unusable file name");
            continue;
        }
        let file_name = match avatar.image_path.extension() {
            Some(ext) => format!("{name}.{}", ext.to_string_lossy()),
            None => name.clone(),
        };
        tokio::fs::symlink(&avatar.image_path, dir.join(file_name)).await?;
        linked += 1;
    }
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: DbId, name: &str, image: Option<&str>, aliases: &[&str]) -> AvatarRecord {
        AvatarRecord {
            id,
            name: name.to_string(),
            image: image.map(PathBuf::from),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn project_alias_beats_global_name() {
        let project = vec![record(1, "Alice Smith", Some("/p/alice.png"), &["alice"])];
        let global = vec![record(10, "alice", Some("/g/alice.jpg"), &[])];
        let out = resolve_avatars(&project, &global, ["alice"]);
        let hit = &out["alice"];
        assert_eq!(hit.scope, AvatarScope::Project);
        assert_eq!(hit.avatar_id, 1);
        assert_eq!(hit.alias.as_deref(), Some("alice"));
    }

    #[test]
    fn project_name_beats_project_alias_on_other_record() {
        let project = vec![
            record(1, "bob-old", Some("/p/old.png"), &["bob"]),
            record(2, "bob", Some("/p/bob.png"), &[]),
        ];
        let out = resolve_avatars(&project, &[], ["bob"]);
        assert_eq!(out["bob"].avatar_id, 2);
        assert_eq!(out["bob"].alias, None);
    }

    #[test]
    fn global_alias_is_last_resort() {
        let global = vec![record(10, "Carol", Some("/g/carol.png"), &["cjones"])];
        let out = resolve_avatars(&[], &global, ["cjones", "nobody"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out["cjones"].scope, AvatarScope::Global);
        assert_eq!(out["cjones"].alias.as_deref(), Some("cjones"));
    }

    #[test]
    fn records_without_image_are_absent() {
        let project = vec![record(1, "dave", None, &[])];
        let global = vec![record(10, "dave", Some("/g/dave.png"), &[])];
        let out = resolve_avatars(&project, &global, ["dave"]);
        assert_eq!(out["dave"].scope, AvatarScope::Global);

        let out = resolve_avatars(&project, &[], ["dave"]);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn link_dir_creates_named_symlinks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = tmp.path().join("source.png");
        tokio::fs::write(&image, b"png").await.expect("write");

        let global = vec![
            AvatarRecord {
                id: 1,
                name: "erin".into(),
                image: Some(image.clone()),
                aliases: vec!["a/b".into()],
            },
        ];
        let resolved = resolve_avatars(&[], &global, ["erin", "a/b"]);
        let dir = tmp.path().join("avatars");
        let linked = link_avatar_dir(&dir, &resolved).await.expect("link");

        assert_eq!(linked, 1);
        let target = tokio::fs::read_link(dir.join("erin.png")).await.expect("symlink");
        assert_eq!(target, image);
    }
}
