// Centralized integration suite: resolution scenarios against the shipped
// catalog, bundle assembly, catalog loading and reload, and the CLI.
mod support;

use anyhow::{Context, Result};
use polyfill_engine::{
    Bundle, BundleOptions, CatalogIndex, DirectoryCatalogLoader, Flag, PolyfillEngine,
    PolyfillError, ResolutionRequest, UnknownPolicy, load_catalog_from_path,
};
use serde_json::{Value, json};
use std::process::Command;
use std::sync::Arc;
use support::{catalog_dir, engine, polyfill_binary, run_command, write_catalog};

fn names(engine: &PolyfillEngine, request: &ResolutionRequest) -> Vec<String> {
    engine
        .get_polyfills(request)
        .expect("resolution succeeds")
        .names()
        .map(str::to_string)
        .collect()
}

fn buffered(engine: &PolyfillEngine, request: &ResolutionRequest, minify: bool) -> String {
    engine
        .get_polyfill_string(request, &BundleOptions { minify, ..Default::default() })
        .and_then(Bundle::into_string)
        .expect("bundle assembles")
}

// A client that ships Promise and everything it depends on needs nothing.
#[test]
fn native_support_covers_promise_on_chrome_45() {
    let request = ResolutionRequest::new()
        .with_feature("Promise")
        .with_client("chrome/45");
    assert!(names(&engine(), &request).is_empty());
}

// Unknown clients get the whole dependency closure, gated, with provenance.
#[test]
fn unknown_client_receives_gated_closure() -> Result<()> {
    let request = ResolutionRequest::new()
        .with_feature("Math.sign")
        .with_client("");
    let resolution = engine().get_polyfills(&request)?;
    assert_eq!(
        serde_json::to_value(&resolution)?,
        json!({
            "Math.sign": {"flags": ["gated"], "aliasOf": [], "dependencyOf": []},
            "Object.defineProperty": {
                "flags": ["gated"],
                "aliasOf": [],
                "dependencyOf": ["Math.sign", "_ESAbstract.CreateMethodProperty"]
            },
            "_ESAbstract.CreateMethodProperty": {
                "flags": ["gated"],
                "aliasOf": [],
                "dependencyOf": ["Math.sign"]
            }
        })
    );
    Ok(())
}

#[test]
fn unknown_client_with_ignore_policy_receives_nothing() {
    let engine = engine();
    for features in [
        vec!["Math.sign"],
        vec!["es6", "_FeatureDetect"],
        vec!["all"],
    ] {
        let mut request = ResolutionRequest::new().with_unknown(UnknownPolicy::Ignore);
        for feature in features {
            request = request.with_feature(feature);
        }
        assert!(names(&engine, &request).is_empty());
        assert!(names(&engine, &request.clone().with_client("not a client")).is_empty());
    }
}

// Exclusions drop dependencies; unknown exclude names are ignored.
#[test]
fn excludes_drop_typed_array_for_ie_9() {
    let engine = engine();
    let base = ResolutionRequest::new()
        .with_feature("Math.fround")
        .with_client("ie/9");
    assert_eq!(
        names(&engine, &base),
        vec!["Math.fround", "_ESAbstract.CreateMethodProperty", "_TypedArray"]
    );

    let excluded = base
        .with_exclude("_TypedArray")
        .with_exclude("non-existent-feature");
    assert_eq!(
        names(&engine, &excluded),
        vec!["Math.fround", "_ESAbstract.CreateMethodProperty"]
    );
}

#[test]
fn modern_chrome_needs_no_es6_or_es7_polyfills() {
    let request = ResolutionRequest::new()
        .with_feature("es6")
        .with_feature("es7")
        .with_exclude("Array.prototype.values")
        .with_client("chrome/61");
    assert!(names(&engine(), &request).is_empty());
}

#[test]
fn directly_requested_feature_survives_its_own_exclusion() {
    let request = ResolutionRequest::new()
        .with_feature("Symbol")
        .with_exclude("Symbol")
        .with_exclude("Object.defineProperty")
        .with_client("firefox/30");
    assert_eq!(names(&engine(), &request), vec!["Symbol"]);
}

#[test]
fn all_group_on_old_ie_covers_the_catalog() -> Result<()> {
    let engine = engine();
    let request = ResolutionRequest::new().with_feature("all").with_client("ie/8");
    let resolution = engine.get_polyfills(&request)?;
    assert_eq!(
        resolution.len(),
        engine.repository().snapshot().capability_count()
    );
    let symbol = resolution.get("Symbol").context("Symbol resolved")?;
    assert_eq!(symbol.alias_of, vec!["all"]);

    let always_only = ResolutionRequest::new()
        .with_flagged_feature("all", [Flag::Always])
        .with_client("chrome/90");
    assert_eq!(names(&engine, &always_only), vec!["_FeatureDetect"]);
    Ok(())
}

// Nested aliases record the whole alias chain.
#[test]
fn default_alias_records_provenance() -> Result<()> {
    let resolution = engine().get_polyfills(
        &ResolutionRequest::new()
            .with_feature("default")
            .with_client("ie/8"),
    )?;
    let odp = resolution
        .get("Object.defineProperty")
        .context("Object.defineProperty resolved")?;
    assert_eq!(odp.alias_of, vec!["default", "es5"]);
    assert!(odp.dependency_of.contains(&"Symbol".to_string()));

    let symbol = resolution.get("Symbol").context("Symbol resolved")?;
    assert_eq!(symbol.alias_of, vec!["default"]);
    assert_eq!(symbol.dependency_of, vec!["Promise"]);
    Ok(())
}

#[test]
fn unknown_features_are_reported_not_fatal() -> Result<()> {
    let resolution = engine().get_polyfills(
        &ResolutionRequest::new()
            .with_feature("Math.sign")
            .with_feature("Array.prototype.teleport")
            .with_client("ie/8"),
    )?;
    assert_eq!(resolution.unknown_features, vec!["Array.prototype.teleport"]);
    assert!(resolution.get("Math.sign").is_some());
    Ok(())
}

#[test]
fn requests_decode_from_service_json() -> Result<()> {
    let request: ResolutionRequest = serde_json::from_value(json!({
        "features": {"Math.sign": {"flags": ["always"]}},
        "excludes": ["Object.defineProperty"],
        "uaString": "chrome/90",
        "unknown": "ignore"
    }))?;
    assert_eq!(
        names(&engine(), &request),
        vec!["Math.sign", "_ESAbstract.CreateMethodProperty"]
    );
    Ok(())
}

// Fragments are emitted after everything they depend on.
#[test]
fn bundle_orders_dependencies_first() {
    let text = buffered(
        &engine(),
        &ResolutionRequest::new().with_feature("Array.prototype.values"),
        false,
    );
    let position = |name: &str| {
        text.find(&format!("\n// {name}\n"))
            .unwrap_or_else(|| panic!("{name} missing from bundle"))
    };
    assert!(position("Object.defineProperty") < position("_ESAbstract.CreateMethodProperty"));
    assert!(position("Object.defineProperty") < position("Symbol"));
    assert!(position("Symbol") < position("Symbol.iterator"));
    assert!(position("Symbol.iterator") < position("Array.prototype.values"));
    assert!(text.starts_with("/* Polyfill service v"));
    assert!(text.contains("(function(self, undefined) {"));
    assert!(text.contains("if (!('values' in Array.prototype)) {"));
}

#[test]
fn gated_and_ungated_bundles_differ() {
    let engine = engine();
    let known = buffered(
        &engine,
        &ResolutionRequest::new().with_feature("Math.sign").with_client("ie/8"),
        false,
    );
    let unknown = buffered(
        &engine,
        &ResolutionRequest::new().with_feature("Math.sign"),
        false,
    );
    assert_ne!(known, unknown);
    assert!(!known.contains("if (!('sign' in Math))"));
    assert!(unknown.contains("if (!('sign' in Math))"));
}

#[test]
fn empty_resolution_still_produces_a_script() {
    let text = buffered(
        &engine(),
        &ResolutionRequest::new().with_feature("Promise").with_client("chrome/45"),
        false,
    );
    assert!(text.contains("No polyfills needed for the current settings"));
    assert!(text.contains("(function(self, undefined) {\n})"));
    assert!(text.contains("Features requested: Promise"));
}

#[test]
fn streamed_bundle_matches_buffered_bundle() -> Result<()> {
    let engine = engine();
    let requests = [
        ResolutionRequest::new().with_feature("es6"),
        ResolutionRequest::new().with_feature("default").with_client("ie/8"),
        ResolutionRequest::new().with_feature("Promise").with_client("chrome/45"),
    ];
    for request in &requests {
        for minify in [false, true] {
            let whole = buffered(&engine, request, minify);
            let Bundle::Stream(stream) = engine.get_polyfill_string(
                request,
                &BundleOptions { stream: true, minify, callback: None },
            )?
            else {
                panic!("stream requested");
            };
            let chunks = stream.collect::<Result<Vec<_>, _>>()?;
            assert_eq!(chunks.concat(), whole);
        }
    }
    Ok(())
}

#[test]
fn missing_fragment_fails_the_bundle() -> Result<()> {
    let dir = write_catalog(
        "missing_source",
        json!([
            {"name": "Present"},
            {"name": "Absent", "dependencies": ["Present"]}
        ]),
        json!({}),
        &[("Present.js", "present();")],
    )?;
    let engine = PolyfillEngine::from_dir(dir.path())?;
    let request = ResolutionRequest::new().with_feature("Absent");

    let err = engine
        .get_polyfill_string(&request, &BundleOptions::default())
        .err()
        .context("buffered bundle should fail")?;
    assert!(err.is_integrity_error());
    assert!(matches!(err, PolyfillError::MissingSource { ref name, .. } if name == "Absent"));

    let Bundle::Stream(stream) = engine.get_polyfill_string(
        &request,
        &BundleOptions { stream: true, ..Default::default() },
    )?
    else {
        panic!("stream requested");
    };
    let chunks: Vec<_> = stream.collect();
    assert!(chunks.last().is_some_and(|chunk| chunk.is_err()));
    Ok(())
}

#[test]
fn dependency_cycles_are_integrity_errors() -> Result<()> {
    let dir = write_catalog(
        "cyclic",
        json!([
            {"name": "A", "dependencies": ["B"]},
            {"name": "B", "dependencies": ["A"], "browsers": {"chrome": "*"}}
        ]),
        json!({}),
        &[("A.js", "a();"), ("B.js", "b();")],
    )?;
    let index = CatalogIndex::load(dir.path())?;
    assert!(matches!(index.check_acyclic(), Err(PolyfillError::DependencyCycle(_))));

    let engine = PolyfillEngine::from_dir(dir.path())?;
    let err = engine
        .get_polyfills(&ResolutionRequest::new().with_feature("A"))
        .err()
        .context("cycle should fail resolution")?;
    assert!(err.to_string().contains("A -> B -> A") || err.to_string().contains("B -> A -> B"));

    // A client shipping B natively still hits the cycle.
    let request = ResolutionRequest::new().with_feature("A").with_client("chrome/50");
    let err = engine
        .get_polyfills(&request)
        .err()
        .context("cycle should fail resolution for a known client")?;
    assert!(matches!(err, PolyfillError::DependencyCycle(_)));
    Ok(())
}

#[test]
fn dangling_references_fail_catalog_load() -> Result<()> {
    let dir = write_catalog(
        "dangling",
        json!([{"name": "A", "dependencies": ["Ghost"]}]),
        json!({}),
        &[],
    )?;
    let err = CatalogIndex::load(dir.path()).err().context("load should fail")?;
    assert!(format!("{err:#}").contains("references unknown capability 'Ghost'"));
    Ok(())
}

#[test]
fn schema_rejects_unknown_fields() -> Result<()> {
    let dir = write_catalog(
        "extra_field",
        json!([{"name": "A", "polyfill_url": "https://example.invalid/a.js"}]),
        json!({}),
        &[],
    )?;
    assert!(CatalogIndex::load(dir.path()).is_err());
    Ok(())
}

#[test]
fn shipped_catalog_is_consistent() -> Result<()> {
    let catalog = load_catalog_from_path(&catalog_dir())?;
    assert_eq!(catalog.schema_version, "polyfill_catalog_v1");
    let index = CatalogIndex::load(&catalog_dir())?;
    index.check_acyclic()?;
    for (_, capability) in index.capabilities() {
        let path = catalog_dir().join("sources").join(capability.source.as_str());
        assert!(path.is_file(), "missing fragment {}", path.display());
    }
    Ok(())
}

// A reload swaps the snapshot for later requests only.
#[test]
fn reload_is_visible_to_new_requests() -> Result<()> {
    let first = write_catalog("first", json!([{"name": "A"}]), json!({}), &[("A.js", "a();")])?;
    let second = write_catalog(
        "second",
        json!([{"name": "A"}, {"name": "B"}]),
        json!({}),
        &[("A.js", "a();"), ("B.js", "b();")],
    )?;
    let engine = PolyfillEngine::from_dir(first.path())?;
    let held = engine.repository().snapshot();

    let request = ResolutionRequest::new().with_feature("B");
    assert!(engine.get_polyfills(&request)?.is_empty());

    engine
        .repository()
        .reload(&DirectoryCatalogLoader::new(second.path()))?;
    assert_eq!(engine.repository().key().0, "second");
    assert_eq!(held.key().0, "first");
    assert_eq!(engine.get_polyfills(&request)?.len(), 1);
    Ok(())
}

#[test]
fn concurrent_requests_share_one_engine() {
    let engine = Arc::new(engine());
    let request = ResolutionRequest::new().with_feature("es6").with_client("ie/10");
    let expected = engine.get_polyfills(&request).expect("baseline resolution");

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let request = request.clone();
                scope.spawn(move || engine.get_polyfills(&request).expect("resolution"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("thread completes"), expected);
        }
    });
}

#[test]
fn cli_resolve_prints_json() -> Result<()> {
    let mut cmd = Command::new(polyfill_binary());
    cmd.arg("resolve")
        .arg("--catalog")
        .arg(catalog_dir())
        .arg("--features")
        .arg("Math.sign")
        .arg("--ua")
        .arg("");
    let output = run_command(cmd)?;
    let value: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        value["Object.defineProperty"]["dependencyOf"],
        json!(["Math.sign", "_ESAbstract.CreateMethodProperty"])
    );
    Ok(())
}

#[test]
fn cli_bundle_streams_to_stdout() -> Result<()> {
    let mut cmd = Command::new(polyfill_binary());
    cmd.env("POLYFILL_CATALOG_DIR", catalog_dir())
        .arg("bundle")
        .arg("--features")
        .arg("Math.fround|gated")
        .arg("--ua")
        .arg("ie/9")
        .arg("--stream")
        .arg("--callback")
        .arg("onPolyfilled");
    let output = run_command(cmd)?;
    let text = String::from_utf8(output.stdout)?;
    assert!(text.contains("if (!('fround' in Math)) {"));
    assert!(text.contains("typeof onPolyfilled === 'function' && onPolyfilled();"));
    Ok(())
}

#[test]
fn cli_check_reports_catalog_summary() -> Result<()> {
    let mut cmd = Command::new(polyfill_binary());
    cmd.arg("check").arg("--catalog").arg(catalog_dir());
    let output = run_command(cmd)?;
    let text = String::from_utf8(output.stdout)?;
    assert!(text.starts_with("catalog core_polyfills: 13 capabilities, 4 aliases"));
    assert!(text.trim_end().ends_with("(Core language polyfills)"));

    let broken = write_catalog("broken", json!([{"name": "A"}]), json!({}), &[])?;
    let mut cmd = Command::new(polyfill_binary());
    cmd.arg("check").arg("--catalog").arg(broken.path());
    let err = run_command(cmd).err().context("check should fail")?;
    assert!(err.to_string().contains("missing source fragments"));
    Ok(())
}
