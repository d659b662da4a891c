//! Pure transformation from extracted assets to a deployable bundle.
//!
//! `transform` is deterministic: the same asset set (by content-hash set)
//! yields byte-identical output files and an identical manifest. It performs
//! no network or cloud calls; its only failures are malformed input, which
//! are permanent and never retried. The heavy optimization algorithms
//! (image recompression, real JS parsing) are collaborator territory; the
//! hooks here keep the rewriting rules conservative.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::MigrationError;
use siteferry_types::asset::AssetKind;
use siteferry_types::bundle::{Bundle, BundleFile};
use siteferry_types::error::GatewayError;
use siteferry_types::plan::MigrationPlan;

/// An asset together with its payload bytes loaded from the content cache.
#[derive(Debug, Clone)]
pub struct LoadedAsset {
    pub asset: siteferry_types::asset::Asset,
    pub bytes: Vec<u8>,
}

/// One built file: manifest entry plus the bytes to deploy.
#[derive(Debug, Clone)]
pub struct BuiltFile {
    pub file: BundleFile,
    pub bytes: Vec<u8>,
}

/// Result of a transformation: the manifest and every file's bytes.
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    pub bundle: Bundle,
    pub files: Vec<BuiltFile>,
}

static CSS_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid css comment regex"));
static JS_LINE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[\s;{}])//[^\n]*").expect("valid js comment regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static CSS_BEFORE_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";\s*\}").expect("valid css close regex"));
static CSS_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*").expect("valid css open regex"));
static CSS_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\}\s*").expect("valid css close regex"));
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("valid script regex"));
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<link\b[^>]*>").expect("valid link regex"));
static CLASS_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s*class\s*=\s*"([^"]*)""#).expect("valid class regex"));
static FORM_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<form\b[^>]*>").expect("valid form regex"));
static ACTION_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)action\s*=\s*"[^"]*""#).expect("valid action regex"));
static METHOD_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)method\s*=\s*"[^"]*""#).expect("valid method regex"));

fn malformed(code: &str, message: String) -> MigrationError {
    MigrationError::Gateway(GatewayError::data(code, message))
}

fn utf8(bytes: &[u8], what: &str, path: &str) -> Result<String, MigrationError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| malformed("NOT_UTF8", format!("{what} '{path}' is not valid UTF-8")))
}

/// Final deployed path for a static resource: content-addressed with the
/// original extension preserved.
#[must_use]
pub fn static_target_path(source_path: &str, hash: &str) -> String {
    let file_name = source_path.rsplit('/').next().unwrap_or(source_path);
    let ext = file_name
        .rsplit_once('.')
        .map_or("bin", |(_, e)| e)
        .to_ascii_lowercase();
    let short = &hash[..hash.len().min(8)];
    format!("assets/static/{short}.{ext}")
}

/// Final deployed path for a page.
#[must_use]
pub fn page_target_path(source_path: &str) -> String {
    let trimmed = source_path.trim_matches('/');
    if trimmed.is_empty() {
        return "index.html".to_string();
    }
    let slug: String = trimmed
        .replace('/', "-")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if slug.ends_with(".html") {
        slug
    } else {
        let base = slug.strip_suffix(".htm").unwrap_or(&slug);
        format!("{base}.html")
    }
}

fn minify_css(text: &str) -> String {
    let text = CSS_COMMENT_RE.replace_all(text, "");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let text = CSS_BEFORE_CLOSE_RE.replace_all(&text, "}");
    let text = CSS_OPEN_RE.replace_all(&text, "{");
    let text = CSS_CLOSE_RE.replace_all(&text, "}");
    text.trim().to_string()
}

fn minify_js(text: &str) -> String {
    let text = JS_LINE_COMMENT_RE.replace_all(text, "$1");
    let text = CSS_COMMENT_RE.replace_all(&text, "");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Drop script and stylesheet references that carry any of the builder
/// platform's marker strings, and scrub marker-prefixed class names.
fn strip_markers(html: &str, markers: &[String]) -> String {
    if markers.is_empty() {
        return html.to_string();
    }
    let lowered_markers: Vec<String> = markers.iter().map(|m| m.to_lowercase()).collect();
    let carries_marker =
        |text: &str| -> bool {
            let lowered = text.to_lowercase();
            lowered_markers.iter().any(|m| lowered.contains(m))
        };

    let html = SCRIPT_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        if carries_marker(&caps[0]) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    let html = LINK_RE.replace_all(&html, |caps: &regex::Captures<'_>| {
        if carries_marker(&caps[0]) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    let html = CLASS_ATTR_RE.replace_all(&html, |caps: &regex::Captures<'_>| {
        let kept: Vec<&str> = caps[1]
            .split_whitespace()
            .filter(|class| {
                let lowered = class.to_lowercase();
                !lowered_markers.iter().any(|m| lowered.starts_with(m.as_str()))
            })
            .collect();
        if kept.is_empty() {
            String::new()
        } else {
            format!(" class=\"{}\"", kept.join(" "))
        }
    });
    html.into_owned()
}

/// Point every form at the replacement submission endpoint, forcing POST.
fn rewrite_forms(html: &str, endpoint_path: &str) -> String {
    FORM_TAG_RE
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            let tag = if ACTION_ATTR_RE.is_match(tag) {
                ACTION_ATTR_RE
                    .replace(tag, format!("action=\"{endpoint_path}\""))
                    .into_owned()
            } else {
                tag.replacen("<form", &format!("<form action=\"{endpoint_path}\""), 1)
            };
            if METHOD_ATTR_RE.is_match(&tag) {
                METHOD_ATTR_RE.replace(&tag, "method=\"post\"").into_owned()
            } else {
                tag.replacen("<form", "<form method=\"post\"", 1)
            }
        })
        .into_owned()
}

/// Rewrite references to extracted static resources so they resolve against
/// the deployed path scheme. Longer source paths are replaced first so a
/// path that prefixes another never clobbers it.
fn rewrite_references(
    html: &str,
    base_url: &str,
    mapping: &BTreeMap<String, String>,
) -> String {
    let mut sources: Vec<(&String, &String)> = mapping.iter().collect();
    sources.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

    let mut out = html.to_string();
    let base = base_url.trim_end_matches('/');
    for (source, target) in sources {
        let absolute = format!("{base}{source}");
        out = out.replace(&absolute, &format!("/{target}"));
        out = out.replace(source.as_str(), &format!("/{target}"));
    }
    out
}

/// Final deployed path for one form definition.
#[must_use]
pub fn form_target_path(source_path: &str) -> String {
    let name = source_path
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("form");
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("api/forms/{slug}.json")
}

/// Enrich one form definition with routing and field validation rules.
fn build_form_definition(
    plan: &MigrationPlan,
    loaded: &LoadedAsset,
) -> Result<Vec<u8>, MigrationError> {
    let raw = utf8(&loaded.bytes, "form definition", &loaded.asset.source_path)?;
    let mut value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
        malformed(
            "BAD_FORM_JSON",
            format!(
                "form definition '{}' is not valid JSON: {e}",
                loaded.asset.source_path
            ),
        )
    })?;
    let obj = value.as_object_mut().ok_or_else(|| {
        malformed(
            "BAD_FORM_SHAPE",
            format!(
                "form definition '{}' must be a JSON object",
                loaded.asset.source_path
            ),
        )
    })?;
    obj.insert(
        "handler_endpoint".to_string(),
        serde_json::Value::String(plan.forms.endpoint_path.clone()),
    );
    obj.insert(
        "notify_email".to_string(),
        serde_json::Value::String(plan.forms.notify_email.clone()),
    );
    if let Some(fields) = obj.get_mut("fields").and_then(|f| f.as_array_mut()) {
        for field in fields.iter_mut().filter_map(|f| f.as_object_mut()) {
            let mut validation = serde_json::Map::new();
            if field.get("required").and_then(serde_json::Value::as_bool) == Some(true) {
                validation.insert("required".to_string(), serde_json::Value::Bool(true));
            }
            match field.get("type").and_then(serde_json::Value::as_str) {
                Some("email") => {
                    validation.insert("email".to_string(), serde_json::Value::Bool(true));
                }
                Some("tel") => {
                    validation.insert("phone".to_string(), serde_json::Value::Bool(true));
                }
                _ => {}
            }
            field.insert(
                "validation".to_string(),
                serde_json::Value::Object(validation),
            );
        }
    }
    serde_json::to_vec_pretty(&value).map_err(|e| MigrationError::Infrastructure(e.into()))
}

/// Transform an extracted asset set into a deployable bundle.
///
/// # Errors
///
/// Returns a permanent data error for malformed input (non-UTF-8 text
/// payloads, unparseable form definitions). Never retried.
pub fn transform(
    plan: &MigrationPlan,
    assets: &[LoadedAsset],
) -> Result<BuiltBundle, MigrationError> {
    let mut ordered: Vec<&LoadedAsset> = assets.iter().collect();
    ordered.sort_by(|a, b| a.asset.identity().cmp(&b.asset.identity()));

    let pages: Vec<&LoadedAsset> = ordered
        .iter()
        .copied()
        .filter(|a| a.asset.kind == AssetKind::Page)
        .collect();
    let statics: Vec<&LoadedAsset> = ordered
        .iter()
        .copied()
        .filter(|a| a.asset.kind == AssetKind::StaticResource)
        .collect();
    let forms: Vec<&LoadedAsset> = ordered
        .iter()
        .copied()
        .filter(|a| a.asset.kind == AssetKind::FormDefinition)
        .collect();

    // Static resources first: pages need the source -> target mapping.
    let mut mapping: BTreeMap<String, String> = BTreeMap::new();
    let mut files: Vec<BuiltFile> = Vec::with_capacity(ordered.len() + 1);

    let mut static_files = Vec::with_capacity(statics.len());
    for loaded in &statics {
        let target = static_target_path(&loaded.asset.source_path, &loaded.asset.content_hash);
        mapping.insert(loaded.asset.source_path.clone(), target.clone());

        let ext = target.rsplit('.').next().unwrap_or("");
        let bytes = match ext {
            "css" if plan.processing.minify_css => {
                minify_css(&utf8(&loaded.bytes, "stylesheet", &loaded.asset.source_path)?)
                    .into_bytes()
            }
            "js" if plan.processing.minify_js => {
                minify_js(&utf8(&loaded.bytes, "script", &loaded.asset.source_path)?).into_bytes()
            }
            // Image optimization is a collaborator concern; bytes pass through.
            _ => loaded.bytes.clone(),
        };
        static_files.push(BuiltFile {
            file: BundleFile {
                path: target,
                content_hash: siteferry_types::asset::content_hash(&bytes),
                source_hashes: vec![loaded.asset.content_hash.clone()],
            },
            bytes,
        });
    }

    for loaded in &pages {
        let html = utf8(&loaded.bytes, "page", &loaded.asset.source_path)?;
        let html = strip_markers(&html, &plan.processing.strip_markers);
        let html = rewrite_references(&html, &plan.source.base_url, &mapping);
        let html = rewrite_forms(&html, &plan.forms.endpoint_path);
        let bytes = html.into_bytes();
        files.push(BuiltFile {
            file: BundleFile {
                path: page_target_path(&loaded.asset.source_path),
                content_hash: siteferry_types::asset::content_hash(&bytes),
                source_hashes: vec![loaded.asset.content_hash.clone()],
            },
            bytes,
        });
    }

    files.extend(static_files);

    for loaded in &forms {
        let bytes = build_form_definition(plan, loaded)?;
        files.push(BuiltFile {
            file: BundleFile {
                path: form_target_path(&loaded.asset.source_path),
                content_hash: siteferry_types::asset::content_hash(&bytes),
                source_hashes: vec![loaded.asset.content_hash.clone()],
            },
            bytes,
        });
    }

    // Deterministic build stamp: derived from the inputs, not the clock.
    let built_at = ordered
        .iter()
        .map(|a| a.asset.fetched_at.clone())
        .max()
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string());

    let manifest = files.iter().map(|f| f.file.clone()).collect();
    Ok(BuiltBundle {
        bundle: Bundle::new(manifest, built_at),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteferry_types::asset::{content_hash, Asset};
    use siteferry_types::plan::{
        ComputeSpec, DnsSpec, FormRouting, FunctionSpec, ProcessingOptions, SourceRef, StorageSpec,
        TargetImage,
    };

    fn plan() -> MigrationPlan {
        MigrationPlan {
            name: "demo".into(),
            source: SourceRef {
                base_url: "https://demo.example".into(),
                project_id: None,
            },
            compute: ComputeSpec {
                name: "demo-web".into(),
                machine_type: "e2-small".into(),
                disk_gb: 10,
                image: TargetImage::DebianFamily,
            },
            storage: StorageSpec {
                bucket: "demo-content".into(),
                location: "us-central1".into(),
            },
            dns: Some(DnsSpec {
                zone: "demo-zone".into(),
                domain: "demo.example".into(),
            }),
            function: FunctionSpec {
                name: "demo-forms".into(),
                runtime: "python312".into(),
                region: "us-central1".into(),
            },
            forms: FormRouting {
                endpoint_path: "/api/forms".into(),
                notify_email: "owner@demo.example".into(),
            },
            processing: ProcessingOptions {
                minify_css: true,
                minify_js: true,
                optimize_images: true,
                strip_markers: vec!["builderco".into()],
            },
            host: siteferry_types::plan::HostOptions::default(),
            tls_email: None,
            dry_run: false,
        }
    }

    fn loaded(kind: AssetKind, path: &str, bytes: &[u8]) -> LoadedAsset {
        LoadedAsset {
            asset: Asset {
                kind,
                source_path: path.into(),
                content_hash: content_hash(bytes),
                size_bytes: bytes.len() as u64,
                fetched_at: "2026-08-01T00:00:00Z".into(),
            },
            bytes: bytes.to_vec(),
        }
    }

    fn sample_assets() -> Vec<LoadedAsset> {
        vec![
            loaded(
                AssetKind::Page,
                "/",
                b"<html><head>\
                  <link rel=\"stylesheet\" href=\"/style.css\">\
                  <script src=\"https://cdn.builderco.net/boot.js\"></script>\
                  </head><body class=\"builderco-hero wide\">\
                  <img src=\"https://demo.example/img/logo.png\">\
                  <form action=\"https://builderco.net/submit\"><input name=\"email\"></form>\
                  </body></html>",
            ),
            loaded(AssetKind::Page, "/about", b"<html><body>About</body></html>"),
            loaded(
                AssetKind::StaticResource,
                "/style.css",
                b"/* banner */ body {  margin: 0 ; }\n",
            ),
            loaded(AssetKind::StaticResource, "/img/logo.png", b"\x89PNGfake"),
            loaded(
                AssetKind::FormDefinition,
                "/forms/contact",
                br#"{"name":"contact","fields":[{"name":"email","type":"email","required":true}]}"#,
            ),
        ]
    }

    #[test]
    fn transform_is_deterministic() {
        let plan = plan();
        let assets = sample_assets();

        let a = transform(&plan, &assets).unwrap();
        let mut shuffled = assets.clone();
        shuffled.reverse();
        let b = transform(&plan, &shuffled).unwrap();

        assert_eq!(a.bundle, b.bundle);
        assert_eq!(a.bundle.bundle_hash, b.bundle.bundle_hash);
        for (fa, fb) in a.files.iter().zip(b.files.iter()) {
            assert_eq!(fa.file, fb.file);
            assert_eq!(fa.bytes, fb.bytes);
        }
    }

    #[test]
    fn pages_get_rewritten_references_and_forms() {
        let result = transform(&plan(), &sample_assets()).unwrap();
        let index = result
            .files
            .iter()
            .find(|f| f.file.path == "index.html")
            .unwrap();
        let html = String::from_utf8(index.bytes.clone()).unwrap();

        // Asset references point at the content-addressed scheme.
        assert!(html.contains("/assets/static/"));
        assert!(!html.contains("https://demo.example/img/logo.png"));

        // Forms post to the replacement endpoint.
        assert!(html.contains("action=\"/api/forms\""));
        assert!(html.contains("method=\"post\""));
        assert!(!html.contains("builderco.net/submit"));
    }

    #[test]
    fn builder_markers_are_stripped() {
        let result = transform(&plan(), &sample_assets()).unwrap();
        let index = result
            .files
            .iter()
            .find(|f| f.file.path == "index.html")
            .unwrap();
        let html = String::from_utf8(index.bytes.clone()).unwrap();

        assert!(!html.contains("cdn.builderco.net/boot.js"));
        assert!(!html.contains("builderco-hero"));
        assert!(html.contains("class=\"wide\""));
    }

    #[test]
    fn css_is_minified() {
        let result = transform(&plan(), &sample_assets()).unwrap();
        let css = result
            .files
            .iter()
            .find(|f| f.file.path.ends_with(".css"))
            .unwrap();
        let text = String::from_utf8(css.bytes.clone()).unwrap();
        assert!(!text.contains("banner"));
        assert!(!text.contains('\n'));
        assert!(text.contains("body"));
    }

    #[test]
    fn images_pass_through_untouched() {
        let assets = sample_assets();
        let result = transform(&plan(), &assets).unwrap();
        let png = result
            .files
            .iter()
            .find(|f| f.file.path.ends_with(".png"))
            .unwrap();
        assert_eq!(png.bytes, b"\x89PNGfake");
    }

    #[test]
    fn form_definitions_carry_routing_and_validation() {
        let result = transform(&plan(), &sample_assets()).unwrap();
        let manifest = result
            .files
            .iter()
            .find(|f| f.file.path == "api/forms/contact.json")
            .unwrap();
        let form: serde_json::Value = serde_json::from_slice(&manifest.bytes).unwrap();
        assert_eq!(form["handler_endpoint"], "/api/forms");
        assert_eq!(form["notify_email"], "owner@demo.example");
        assert_eq!(form["fields"][0]["validation"]["email"], true);
        assert_eq!(form["fields"][0]["validation"]["required"], true);
    }

    #[test]
    fn one_bundle_file_per_asset() {
        // 2 pages + 2 static + 1 form.
        let result = transform(&plan(), &sample_assets()).unwrap();
        assert_eq!(result.files.len(), 5);
    }

    #[test]
    fn malformed_form_json_is_permanent_data_error() {
        let assets = vec![loaded(AssetKind::FormDefinition, "/forms/broken", b"{ nope")];
        let err = transform(&plan(), &assets).unwrap_err();
        assert!(!err.is_retryable());
        let ge = err.as_gateway_error().unwrap();
        assert_eq!(ge.category, siteferry_types::error::ErrorCategory::Data);
    }

    #[test]
    fn non_utf8_page_is_permanent_data_error() {
        let assets = vec![loaded(AssetKind::Page, "/bad", &[0xff, 0xfe, 0x00])];
        let err = transform(&plan(), &assets).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn page_target_paths() {
        assert_eq!(page_target_path("/"), "index.html");
        assert_eq!(page_target_path("/about"), "about.html");
        assert_eq!(page_target_path("/blog/post one"), "blog-post-one.html");
        assert_eq!(page_target_path("/contact.html"), "contact.html");
    }

    #[test]
    fn static_target_keeps_extension() {
        let hash = content_hash(b"x");
        let path = static_target_path("/img/logo.PNG", &hash);
        assert!(path.starts_with("assets/static/"));
        assert!(path.ends_with(".png"));
        assert!(path.contains(&hash[..8]));
    }

    #[test]
    fn js_minify_preserves_urls() {
        let js = "var u = \"https://demo.example/x\"; // trailing comment\nrun(u);";
        let out = minify_js(js);
        assert!(out.contains("https://demo.example/x"));
        assert!(!out.contains("trailing comment"));
    }
}
