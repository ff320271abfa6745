use std::fs;
use std::path::Path;

/// 读取目录下 package.json 的 name 字段
fn manifest_name(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("package.json")).ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&content).ok()?;
    manifest
        .get("name")
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// 从目录向上查找项目名
///
/// - 记录最近的带 package.json name 的祖先；
/// - 记录最外层同时有 package.json 与 node_modules 的祖先（已安装的项目）；
/// - 遇到 `.git` 即停止，优先用该层的 name，否则用其下最近的 name；
/// - 到达 home 目录或文件系统根时无条件停止。
///
/// monorepo 的子包因此会归到同一个仓库根项目下。
pub fn find_project_name(dir: &Path, home: Option<&Path>) -> Option<String> {
    let mut nearest_name: Option<String> = None;
    let mut outermost_installed: Option<String> = None;
    let mut current = Some(dir);

    while let Some(dir) = current {
        // 文件系统根
        if dir.parent().is_none() {
            break;
        }
        if home == Some(dir) {
            break;
        }

        let pkg_name = manifest_name(dir);
        if nearest_name.is_none() {
            nearest_name = pkg_name.clone();
        }
        if pkg_name.is_some() && dir.join("node_modules").exists() {
            outermost_installed = pkg_name.clone();
        }
        if dir.join(".git").exists() {
            return pkg_name.or(nearest_name);
        }

        current = dir.parent();
    }

    outermost_installed.or(nearest_name)
}

/// 解析失败时使用目录本身的名字
pub fn resolve_app_name(cwd: &Path, home: Option<&Path>) -> Option<String> {
    find_project_name(cwd, home).or_else(|| {
        cwd.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("package.json"), format!(r#"{{"name": "{}"}}"#, name)).unwrap();
    }

    fn setup() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().join("home").join("u");
        fs::create_dir_all(&home).unwrap();
        (tmp, home)
    }

    #[test]
    fn test_git_boundary_uses_root_manifest() {
        let (_tmp, home) = setup();
        let proj = home.join("proj");
        write_manifest(&proj, "proj");
        fs::create_dir_all(proj.join(".git")).unwrap();
        let sub = proj.join("sub");
        fs::create_dir_all(&sub).unwrap();

        assert_eq!(find_project_name(&sub, Some(&home)), Some("proj".to_string()));
    }

    #[test]
    fn test_git_boundary_without_manifest_uses_nearest() {
        let (_tmp, home) = setup();
        let repo = home.join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        let pkg = repo.join("packages").join("api");
        write_manifest(&pkg, "@repo/api");

        assert_eq!(find_project_name(&pkg, Some(&home)), Some("@repo/api".to_string()));
    }

    #[test]
    fn test_git_file_counts_as_boundary() {
        let (_tmp, home) = setup();
        let worktree = home.join("wt");
        write_manifest(&worktree, "wt-app");
        fs::write(worktree.join(".git"), "gitdir: /elsewhere").unwrap();
        write_manifest(&home, "home-manifest");

        assert_eq!(find_project_name(&worktree, Some(&home)), Some("wt-app".to_string()));
    }

    #[test]
    fn test_nothing_found_returns_none() {
        let (_tmp, home) = setup();
        let leaf = home.join("scratch").join("tool");
        fs::create_dir_all(&leaf).unwrap();

        assert_eq!(find_project_name(&leaf, Some(&home)), None);
        assert_eq!(resolve_app_name(&leaf, Some(&home)), Some("tool".to_string()));
    }

    #[test]
    fn test_outermost_installed_project_preferred() {
        let (_tmp, home) = setup();
        let mono = home.join("mono");
        write_manifest(&mono, "mono");
        fs::create_dir_all(mono.join("node_modules")).unwrap();
        let app = mono.join("apps").join("web");
        write_manifest(&app, "web");
        fs::create_dir_all(app.join("node_modules")).unwrap();

        assert_eq!(find_project_name(&app, Some(&home)), Some("mono".to_string()));
    }

    #[test]
    fn test_nearest_manifest_without_install() {
        let (_tmp, home) = setup();
        let outer = home.join("outer");
        write_manifest(&outer, "outer");
        let inner = outer.join("inner");
        write_manifest(&inner, "inner");

        assert_eq!(find_project_name(&inner, Some(&home)), Some("inner".to_string()));
    }

    #[test]
    fn test_stops_at_home() {
        let (_tmp, home) = setup();
        write_manifest(&home, "dotfiles");
        fs::create_dir_all(home.join(".git")).unwrap();
        let leaf = home.join("loose");
        fs::create_dir_all(&leaf).unwrap();

        assert_eq!(find_project_name(&leaf, Some(&home)), None);
    }

    #[test]
    fn test_invalid_manifest_ignored() {
        let (_tmp, home) = setup();
        let proj = home.join("broken");
        fs::create_dir_all(proj.join(".git")).unwrap();
        fs::write(proj.join("package.json"), "{ not json").unwrap();

        assert_eq!(find_project_name(&proj, Some(&home)), None);
        assert_eq!(resolve_app_name(&proj, Some(&home)), Some("broken".to_string()));
    }
}
