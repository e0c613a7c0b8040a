//! Helpers that build OCI image layouts on disk for the integration tests.

#![allow(dead_code)]

use clap::Parser;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tar_rs as tar;
use tempfile::TempDir;

use diffoci::command::{self, DiffArgs};
use diffoci::{Context, ExecutionOutcome, LayerEngine, LayoutBackend};

pub const MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// One file in a test layer.
#[derive(Debug, Clone)]
pub struct TestFile {
    pub path: &'static str,
    pub content: &'static str,
    pub mode: u32,
    pub mtime: u64,
}

impl TestFile {
    pub fn new(path: &'static str, content: &'static str) -> Self {
        Self {
            path,
            content,
            mode: 0o644,
            mtime: 1_700_000_000,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }
}

/// An image to store in the layout: a config timestamp and its layers.
#[derive(Debug, Clone)]
pub struct TestImage {
    pub created: &'static str,
    pub layers: Vec<Vec<TestFile>>,
}

impl TestImage {
    pub fn new(created: &'static str, layers: Vec<Vec<TestFile>>) -> Self {
        Self { created, layers }
    }
}

pub fn tar_layer(files: &[TestFile]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        let mut header = tar::Header::new_ustar();
        header.set_size(file.content.len() as u64);
        header.set_mode(file.mode);
        header.set_mtime(file.mtime);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, file.path, file.content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// An OCI layout under construction in a temporary directory.
pub struct TestLayout {
    pub dir: TempDir,
    entries: Vec<Value>,
}

impl TestLayout {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("blobs").join("sha256")).unwrap();
        let layout = Self {
            dir,
            entries: Vec::new(),
        };
        layout.write_index();
        layout
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Stores a blob and returns its descriptor.
    pub fn blob(&self, media_type: &str, data: &[u8]) -> Value {
        let hex = hex::encode(Sha256::digest(data));
        fs::write(self.path().join("blobs").join("sha256").join(&hex), data).unwrap();
        json!({
            "mediaType": media_type,
            "digest": format!("sha256:{}", hex),
            "size": data.len(),
        })
    }

    fn json_blob(&self, media_type: &str, value: &Value) -> Value {
        self.blob(media_type, &serde_json::to_vec(value).unwrap())
    }

    /// Stores the config, layers and manifest of `image`; returns the
    /// manifest descriptor.
    pub fn manifest(&self, image: &TestImage) -> Value {
        let layers: Vec<Value> = image
            .layers
            .iter()
            .map(|files| self.blob(LAYER, &tar_layer(files)))
            .collect();
        let history: Vec<Value> = image
            .layers
            .iter()
            .enumerate()
            .map(|(i, _)| json!({"created": image.created, "created_by": format!("RUN step {}", i)}))
            .collect();
        let config = json!({
            "created": image.created,
            "architecture": "amd64",
            "os": "linux",
            "config": {"Env": ["PATH=/usr/bin"]},
            "rootfs": {"type": "layers", "diff_ids": []},
            "history": history,
        });
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MANIFEST,
            "config": self.json_blob(CONFIG, &config),
            "layers": layers,
        });
        self.json_blob(MANIFEST, &manifest)
    }

    /// Adds a single-manifest image under `name`.
    pub fn add_image(&mut self, name: &str, image: &TestImage) -> Value {
        let desc = self.manifest(image);
        self.add_entry(name, desc.clone());
        desc
    }

    /// Adds an index with one manifest per `(os, arch)` under `name`.
    pub fn add_index(&mut self, name: &str, platforms: &[(&str, &str)], image: &TestImage) -> Value {
        let manifests: Vec<Value> = platforms
            .iter()
            .map(|(os, arch)| {
                let mut desc = self.manifest(image);
                desc["platform"] = json!({"os": os, "architecture": arch});
                desc
            })
            .collect();
        let index = json!({
            "schemaVersion": 2,
            "mediaType": INDEX,
            "manifests": manifests,
        });
        let desc = self.json_blob(INDEX, &index);
        self.add_entry(name, desc.clone());
        desc
    }

    /// Lists `desc` in `index.json` under `name`.
    pub fn add_entry(&mut self, name: &str, mut desc: Value) {
        desc["annotations"] = json!({"io.containerd.image.name": name});
        self.entries.push(desc);
        self.write_index();
    }

    fn write_index(&self) {
        fs::write(
            self.path().join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .unwrap();
        let index = json!({"schemaVersion": 2, "manifests": self.entries});
        fs::write(
            self.path().join("index.json"),
            serde_json::to_vec_pretty(&index).unwrap(),
        )
        .unwrap();
    }
}

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    diff: DiffArgs,
}

pub fn diff_args(args: &[&str]) -> DiffArgs {
    let mut argv = vec!["diff"];
    argv.extend_from_slice(args);
    TestCli::try_parse_from(argv).unwrap().diff
}

/// Runs `diff` against the layout with a fresh context.
pub fn run_diff(layout: &TestLayout, args: &[&str]) -> ExecutionOutcome {
    run_diff_with(&Context::new(), layout, args)
}

pub fn run_diff_with(ctx: &Context, layout: &TestLayout, args: &[&str]) -> ExecutionOutcome {
    let backend = LayoutBackend::open(layout.path()).unwrap();
    command::run(ctx, &diff_args(args), &backend, &LayerEngine::new())
}
