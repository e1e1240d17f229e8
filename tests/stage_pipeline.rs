use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use assetdag::config::{ProjectSection, StageConfig, TransformSpec};
use assetdag::exec::{StageBackend, StageExecutor};
use assetdag::fs::{FileSystem, RealFileSystem};
use assetdag::server::{ReloadHub, ReloadMessage};
use assetdag::stage::{CacheStore, Stage};
use assetdag::types::CacheStorageMode;
use assetdag_test_utils::builders::StageConfigBuilder;
use assetdag_test_utils::init_tracing;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

fn executor(root: &Path, cache: CacheStore) -> StageExecutor {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    StageExecutor::new(root, fs, cache)
}

fn stage(name: &str, cfg: StageConfig) -> Stage {
    let project = ProjectSection {
        name: "site".to_string(),
        author: "Jane".to_string(),
        copyright: "Example Ltd".to_string(),
    };
    Stage::from_config(name, &cfg, &project).unwrap()
}

#[tokio::test]
async fn concat_and_banner_build_one_bundle() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/css/a.css", "a{}");
    write(tmp.path(), "src/css/b.css", "b{}\n");
    write(tmp.path(), "src/css/print.css", "p{}");

    let css = stage(
        "css",
        StageConfigBuilder::new("src/css/*.css", "dist/css")
            .exclude("print.css")
            .transform(TransformSpec::Concat {
                file: "site.css".to_string(),
            })
            .transform(TransformSpec::Banner {
                template: Some("/* {{name}} by {{author}} */\n".to_string()),
            })
            .build(),
    );

    let result = executor(tmp.path(), CacheStore::in_memory()).run_stage(&css).await;

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.files_written, 1);
    assert_eq!(read(tmp.path(), "dist/css/site.css"), "/* site by Jane */\na{}\nb{}\n");
    assert!(!tmp.path().join("dist/css/print.css").exists());
}

#[tokio::test]
async fn rename_keeps_directory_layout() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/js/app.js", "app()");
    write(tmp.path(), "src/js/lib/util.js", "util()");
    write(tmp.path(), "src/js/vendor.min.js", "v()");

    let js = stage(
        "js",
        StageConfigBuilder::new("src/js/**/*.js", "dist/js")
            .transform(TransformSpec::Rename {
                suffix: Some(".min".to_string()),
                ext: None,
                skip: vec!["*.min.js".to_string()],
            })
            .build(),
    );

    let result = executor(tmp.path(), CacheStore::in_memory()).run_stage(&js).await;

    assert_eq!(result.files_written, 3);
    assert_eq!(read(tmp.path(), "dist/js/app.min.js"), "app()");
    assert_eq!(read(tmp.path(), "dist/js/lib/util.min.js"), "util()");
    assert_eq!(read(tmp.path(), "dist/js/vendor.min.js"), "v()");
}

#[tokio::test]
async fn cached_stage_skips_unchanged_files() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/a.txt", "a");
    write(tmp.path(), "src/b.txt", "b");

    let copy = stage(
        "copy",
        StageConfigBuilder::new("src/*.txt", "out").cache(true).build(),
    );
    let exec = executor(tmp.path(), CacheStore::in_memory());

    let first = exec.run_stage(&copy).await;
    assert_eq!(first.files_written, 2);

    let second = exec.run_stage(&copy).await;
    assert_eq!(second.files_written, 0);
    assert_eq!(second.files_skipped, 2);

    write(tmp.path(), "src/b.txt", "b2");
    let third = exec.run_stage(&copy).await;
    assert_eq!(third.files_written, 1);
    assert_eq!(read(tmp.path(), "out/b.txt"), "b2");
}

#[tokio::test]
async fn evicted_file_is_processed_again() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/a.txt", "a");
    write(tmp.path(), "src/b.txt", "b");

    let copy = stage(
        "copy",
        StageConfigBuilder::new("src/*.txt", "out").cache(true).build(),
    );
    let cache = CacheStore::in_memory();
    let exec = executor(tmp.path(), cache.clone());
    exec.run_stage(&copy).await;

    // Deleted and restored with identical content.
    fs::remove_file(tmp.path().join("src/a.txt")).unwrap();
    assert_eq!(cache.evict(&["copy".to_string()], "src/a.txt"), 1);
    write(tmp.path(), "src/a.txt", "a");

    let result = exec.run_stage(&copy).await;
    assert_eq!(result.files_written, 1);
    assert_eq!(result.files_skipped, 1);
}

#[tokio::test]
async fn file_cache_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/a.txt", "a");

    let copy = stage(
        "copy",
        StageConfigBuilder::new("src/*.txt", "out").cache(true).build(),
    );

    let cache = CacheStore::open(CacheStorageMode::File, tmp.path()).unwrap();
    let first = executor(tmp.path(), cache.clone()).run_stage(&copy).await;
    assert_eq!(first.files_written, 1);
    cache.persist().unwrap();

    let reopened = CacheStore::open(CacheStorageMode::File, tmp.path()).unwrap();
    let second = executor(tmp.path(), reopened).run_stage(&copy).await;
    assert_eq!(second.files_written, 0);
    assert_eq!(second.files_skipped, 1);
}

#[tokio::test]
async fn newer_skips_sources_older_than_output() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/a.txt", "a");
    write(tmp.path(), "src/b.txt", "b");

    let copy = stage(
        "copy",
        StageConfigBuilder::new("src/*.txt", "out").newer(true).build(),
    );
    let exec = executor(tmp.path(), CacheStore::in_memory());

    assert_eq!(exec.run_stage(&copy).await.files_written, 2);

    let second = exec.run_stage(&copy).await;
    assert_eq!(second.files_written, 0);
    assert_eq!(second.files_skipped, 2);

    let future = SystemTime::now() + Duration::from_secs(60);
    fs::File::options()
        .write(true)
        .open(tmp.path().join("src/a.txt"))
        .unwrap()
        .set_modified(future)
        .unwrap();

    let third = exec.run_stage(&copy).await;
    assert_eq!(third.files_written, 1);
    assert_eq!(third.files_skipped, 1);
}

#[tokio::test]
async fn required_stage_without_sources_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let fonts = stage(
        "fonts",
        StageConfigBuilder::new("src/fonts/**/*", "dist/fonts")
            .allow_empty(false)
            .build(),
    );

    let result = executor(tmp.path(), CacheStore::in_memory()).run_stage(&fonts).await;
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].path.is_none());

    let optional = stage(
        "fonts",
        StageConfigBuilder::new("src/fonts/**/*", "dist/fonts").build(),
    );
    let result = executor(tmp.path(), CacheStore::in_memory()).run_stage(&optional).await;
    assert!(result.is_success());
    assert_eq!(result.files_written, 0);
}

#[tokio::test]
async fn written_stylesheet_notifies_reload_clients() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/css/a.css", "a{}");

    let css = stage(
        "css",
        StageConfigBuilder::new("src/css/*.css", "dist/css")
            .transform(TransformSpec::Concat {
                file: "site.css".to_string(),
            })
            .build(),
    );
    let hub = ReloadHub::new();
    let mut rx = hub.subscribe();
    let exec = executor(tmp.path(), CacheStore::in_memory())
        .with_reload(hub, vec!["css".to_string()])
        .with_server_root("dist");

    exec.run_stage(&css).await;

    assert_eq!(
        rx.try_recv().unwrap(),
        ReloadMessage::Css {
            paths: vec!["/css/site.css".to_string()]
        }
    );
}

#[cfg(unix)]
#[tokio::test]
async fn command_transform_pipes_and_changes_extension() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/scss/main.scss", "body{}");
    write(tmp.path(), "src/scss/bad.scss", "bad");

    let scss = stage(
        "scss",
        StageConfigBuilder::new("src/scss/*.scss", "build/css")
            .cache(true)
            .transform(TransformSpec::Command {
                cmd: r#"if [ "$ASSETDAG_FILE" = bad.scss ]; then echo broken >&2; exit 2; fi; tr a-z A-Z"#
                    .to_string(),
                ext: Some("css".to_string()),
                skip: vec![],
            })
            .build(),
    );
    let cache = CacheStore::in_memory();
    let exec = executor(tmp.path(), cache.clone());

    let result = exec.run_stage(&scss).await;

    assert_eq!(result.files_written, 1);
    assert_eq!(read(tmp.path(), "build/css/main.css"), "BODY{}");
    assert!(!tmp.path().join("build/css/bad.css").exists());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].message.contains("broken"));

    // The failed file is retried on the next run, the good one is cached.
    assert!(!cache.partition("scss").contains("src/scss/bad.scss"));
    assert!(cache.partition("scss").contains("src/scss/main.scss"));
}

#[tokio::test]
async fn cached_bundle_drops_deleted_member() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/css/a.css", "a{}");
    write(tmp.path(), "src/css/b.css", "b{}");

    let css = stage(
        "css",
        StageConfigBuilder::new("src/css/*.css", "dist/css")
            .cache(true)
            .transform(TransformSpec::Concat {
                file: "site.css".to_string(),
            })
            .build(),
    );
    let cache = CacheStore::in_memory();
    let exec = executor(tmp.path(), cache.clone());

    assert_eq!(exec.run_stage(&css).await.files_written, 1);
    assert!(read(tmp.path(), "dist/css/site.css").contains("b{}"));

    let unchanged = exec.run_stage(&css).await;
    assert_eq!(unchanged.files_written, 0);

    fs::remove_file(tmp.path().join("src/css/b.css")).unwrap();
    cache.evict(&["css".to_string()], "src/css/b.css");

    let result = exec.run_stage(&css).await;
    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.files_written, 1);
    let bundle = read(tmp.path(), "dist/css/site.css");
    assert!(bundle.starts_with("a{}"), "{bundle}");
    assert!(!bundle.contains("b{}"), "{bundle}");
}

#[tokio::test]
async fn newer_follows_rename_after_concat() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/js/a.js", "a()");
    write(tmp.path(), "src/js/b.js", "b()");

    let js = stage(
        "js",
        StageConfigBuilder::new("src/js/*.js", "dist/js")
            .newer(true)
            .transform(TransformSpec::Concat {
                file: "site.js".to_string(),
            })
            .transform(TransformSpec::Rename {
                suffix: Some(".min".to_string()),
                ext: None,
                skip: vec![],
            })
            .build(),
    );
    let exec = executor(tmp.path(), CacheStore::in_memory());

    assert_eq!(exec.run_stage(&js).await.files_written, 1);
    assert!(tmp.path().join("dist/js/site.min.js").exists());

    let second = exec.run_stage(&js).await;
    assert_eq!(second.files_written, 0);
    assert_eq!(second.files_skipped, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn failed_check_is_retried_while_passing_files_stay_cached() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "src/js/good.js", "ok()");
    write(tmp.path(), "src/js/bad.js", "// TODO fix\nbad()");

    let lint = stage(
        "js_lint",
        StageConfigBuilder::new("src/js/*.js", "")
            .write(false)
            .cache(true)
            .transform(TransformSpec::Check {
                cmd: "! grep -q TODO".to_string(),
                skip: vec![],
            })
            .build(),
    );
    let cache = CacheStore::in_memory();
    let exec = executor(tmp.path(), cache.clone());

    let first = exec.run_stage(&lint).await;
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].path.as_deref(), Some("bad.js"));
    assert_eq!(first.files_written, 0);
    assert!(cache.partition("js_lint").contains("src/js/good.js"));
    assert!(!cache.partition("js_lint").contains("src/js/bad.js"));

    let second = exec.run_stage(&lint).await;
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.errors.len(), 1);

    write(tmp.path(), "src/js/bad.js", "bad()");
    let third = exec.run_stage(&lint).await;
    assert!(third.is_success(), "{:?}", third.errors);
    assert_eq!(third.files_written, 0);
    assert!(cache.partition("js_lint").contains("src/js/bad.js"));

    // Nothing lands next to the sources or in the project root.
    assert!(!tmp.path().join("good.js").exists());
    assert!(!tmp.path().join("bad.js").exists());
}
