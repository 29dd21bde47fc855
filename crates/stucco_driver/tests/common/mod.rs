#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs, io,
    path::Path,
    sync::{Arc, Mutex},
};

use stucco_driver::{
    StdioMux,
    env::MapEnv,
    pipeline::Pipeline,
    proto::{self, FieldResolveInfo, FieldResolveRequest, Function},
};

pub const CA: &str = include_str!("../fixtures/ca.pem");
pub const OTHER_CA: &str = include_str!("../fixtures/other_ca.pem");
pub const CERT: &str = include_str!("../fixtures/client.pem");
pub const KEY: &str = include_str!("../fixtures/client.key");

pub const HERO_SCRIPT: &str = r#"
fn hero(input) {
    #{ name: input.arguments.name, sidekick: "Robin" }
}

fn sidekick(input) {
    #{ name: input.source }
}

fn chatty(input) {
    print("hello from rhai");
    "done"
}
"#;

/// Handler root holding `hero.rhai`.
pub fn handler_dir() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("hero.rhai"), HERO_SCRIPT).unwrap();
    dir
}

pub fn quiet_stdio() -> StdioMux {
    StdioMux::with_originals(Box::new(io::sink()), Box::new(io::sink()))
}

pub fn pipeline(root: &Path, stdio: &StdioMux) -> Pipeline {
    Pipeline::rhai(root, Arc::new(MapEnv::new()), stdio)
}

pub fn field_request(function: &str, field: &str) -> FieldResolveRequest {
    FieldResolveRequest {
        function: Some(Function::named(function)),
        info: Some(FieldResolveInfo {
            field_name: field.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn hero_request() -> FieldResolveRequest {
    FieldResolveRequest {
        arguments: HashMap::from([("name".to_string(), proto::Value::string("Batman"))]),
        ..field_request("hero.hero", "hero")
    }
}

pub fn sidekick_request() -> FieldResolveRequest {
    FieldResolveRequest {
        source: Some(proto::Value::string("Robin")),
        ..field_request("hero.sidekick", "sidekick")
    }
}

/// Writer whose output the test can read back.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
