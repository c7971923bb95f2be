//! Format-preserving edits of container resources in workload manifests.
//!
//! Documents are validated with `serde_yaml`, but never re-serialized. Edits are made
//! on the original lines: an indentation-aware scan gives every line its mapping path
//! (`spec.template.spec.containers[0].resources.limits.cpu`), and only the value token
//! of the targeted fields is replaced. Missing fields are inserted with the
//! surrounding indentation. Comments, ordering, quoting and unrelated fields stay
//! byte-for-byte unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::lib::error::{ManifestError, Result};
use crate::lib::model::{CurrentSpec, ResourceKind, WorkloadKind, WorkloadTarget};
use crate::lib::patch::FieldEdit;
use crate::lib::quantity::{format_request_limit, parse_quantity};

type ManifestResult<T> = std::result::Result<T, ManifestError>;

const DEFAULT_INDENT_STEP: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug)]
struct Frame {
    indent: usize,
    segment: Segment,
    items: usize,
}

/// Byte range of a scalar value inside a line, comment and padding excluded
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct ScannedLine {
    doc: usize,
    /// Column of the key (or sequence item) on this line
    column: usize,
    path: Option<Vec<Segment>>,
    has_key: bool,
    value: Option<Span>,
}

/// Where a container lives inside the line buffer
#[derive(Debug)]
struct ContainerLocation {
    doc: usize,
    prefix: Vec<Segment>,
    key_column: usize,
}

/// Editable copy of a manifest file, one entry per line
struct LineBuffer {
    lines: Vec<String>,
    endings: Vec<String>,
    newline: String,
}

impl LineBuffer {
    fn new(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut endings = Vec::new();
        for raw in text.split_inclusive('\n') {
            let (content, ending) = if let Some(c) = raw.strip_suffix("\r\n") {
                (c, "\r\n")
            } else if let Some(c) = raw.strip_suffix('\n') {
                (c, "\n")
            } else {
                (raw, "")
            };
            lines.push(content.to_string());
            endings.push(ending.to_string());
        }
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" }.to_string();
        Self {
            lines,
            endings,
            newline,
        }
    }

    fn insert(&mut self, at: usize, content: String) {
        // The line before keeps its ending; a last line without one gets one now
        if at > 0 && self.endings[at - 1].is_empty() {
            self.endings[at - 1] = self.newline.clone();
            self.endings.insert(at, String::new());
        } else {
            self.endings.insert(at, self.newline.clone());
        }
        self.lines.insert(at, content);
    }

    fn render(&self) -> String {
        self.lines
            .iter()
            .zip(&self.endings)
            .map(|(l, e)| format!("{}{}", l, e))
            .collect()
    }
}

/// Applies field edits to manifest text
pub struct ManifestUpdater;

impl ManifestUpdater {
    /// Apply every edit to `document`, returning the updated text.
    ///
    /// All-or-nothing: on error the caller's document is untouched.
    pub fn apply(document: &str, edits: &[FieldEdit]) -> ManifestResult<String> {
        validate(document)?;

        let mut buffer = LineBuffer::new(document);
        for edit in edits {
            let (request, limit) = format_request_limit(edit.resource, edit.request, edit.limit);
            set_field(
                &mut buffer,
                &edit.target,
                edit.workload_kind,
                "requests",
                edit.resource,
                &request,
            )?;
            set_field(
                &mut buffer,
                &edit.target,
                edit.workload_kind,
                "limits",
                edit.resource,
                &limit,
            )?;
            debug!(
                "Set {} {} request={} limit={}",
                edit.target, edit.resource, request, limit
            );
        }

        Ok(buffer.render())
    }

    /// Apply edits to a file on disk, writing only when the content changed
    pub fn apply_file(path: &Path, edits: &[FieldEdit]) -> Result<bool> {
        let original = fs::read_to_string(path)?;
        let updated = Self::apply(&original, edits)?;
        if updated == original {
            return Ok(false);
        }
        fs::write(path, updated)?;
        Ok(true)
    }
}

/// Whether `document` declares the target's workload with the target's container
pub fn document_contains(
    document: &str,
    target: &WorkloadTarget,
    workload_kind: WorkloadKind,
) -> ManifestResult<bool> {
    validate(document)?;
    let buffer = LineBuffer::new(document);
    let scanned = scan(&buffer.lines);
    Ok(locate_container(&buffer.lines, &scanned, target, workload_kind).is_some())
}

/// Request and limit the document declares for the target container.
///
/// `None` when the document has no such container. Unset or unparseable values come
/// back as `None` fields.
pub fn declared_resources(
    document: &str,
    target: &WorkloadTarget,
    workload_kind: WorkloadKind,
    resource: ResourceKind,
) -> ManifestResult<Option<CurrentSpec>> {
    validate(document)?;
    let buffer = LineBuffer::new(document);
    let scanned = scan(&buffer.lines);
    let Some(container) = locate_container(&buffer.lines, &scanned, target, workload_kind) else {
        return Ok(None);
    };

    let value = |section: &str| {
        let mut path = container.prefix.clone();
        path.extend(key_path(&["resources", section, resource.manifest_key()]));
        doc_value(&buffer.lines, &scanned, container.doc, &path)
            .and_then(|raw| parse_quantity(resource, raw))
    };

    Ok(Some(CurrentSpec {
        request: value("requests"),
        limit: value("limits"),
    }))
}

/// Every `.yaml`/`.yml` file below `root`, skipping `.git`, sorted by path
pub fn find_manifest_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    find_yaml_files_recursive(root, &mut files)?;
    files.sort();
    debug!("Found {} YAML files under {}", files.len(), root.display());
    Ok(files)
}

fn find_yaml_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }

        if path.is_dir() {
            find_yaml_files_recursive(&path, files)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                files.push(path);
            }
        }
    }

    Ok(())
}

fn validate(document: &str) -> ManifestResult<()> {
    for doc in serde_yaml::Deserializer::from_str(document) {
        serde_yaml::Value::deserialize(doc).map_err(|e| ManifestError::Parse(e.to_string()))?;
    }
    Ok(())
}

/// Split `key: value` at the mapping colon. Returns the key and the offset after the colon.
fn split_key(content: &str) -> Option<(String, usize)> {
    let bytes = content.as_bytes();
    let first = *bytes.first()?;

    if first == b'"' || first == b'\'' {
        let close = content[1..].find(first as char)? + 1;
        let after = &content[close + 1..];
        let rest = after.strip_prefix(':')?;
        if rest.is_empty() || rest.starts_with(' ') {
            return Some((content[1..close].to_string(), close + 2));
        }
        return None;
    }

    if matches!(first, b'{' | b'[' | b'#' | b'&' | b'*' | b'!' | b'|' | b'>') {
        return None;
    }

    let mut search = 0;
    while let Some(pos) = content[search..].find(':') {
        let idx = search + pos;
        let next = content[idx + 1..].chars().next();
        if next.is_none() || next == Some(' ') {
            let key = content[..idx].trim_end();
            if key.contains(" #") {
                return None;
            }
            return Some((key.to_string(), idx + 1));
        }
        search = idx + 1;
    }
    None
}

/// Span of the value after a mapping colon, trailing comment excluded
fn value_span(line: &str, from: usize) -> Option<Span> {
    let rest = &line[from..];
    let leading = rest.len() - rest.trim_start().len();
    let start = from + leading;

    let mut quote: Option<char> = None;
    let mut end = line.len();
    let mut prev = ' ';
    for (i, c) in line[start..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && i == 0 => quote = Some(c),
            None if c == '#' && prev == ' ' => {
                end = start + i;
                break;
            }
            None => {}
        }
        prev = c;
    }

    let end = start + line[start..end].trim_end().len();
    (end > start).then_some(Span { start, end })
}

fn scan(lines: &[String]) -> Vec<ScannedLine> {
    let mut out = Vec::with_capacity(lines.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut doc = 0;
    let mut block_scalar_owner: Option<usize> = None;

    for line in lines {
        let body = line.trim_start_matches(' ');
        let indent = line.len() - body.len();
        let content = body.trim_end();

        if let Some(owner) = block_scalar_owner {
            if content.is_empty() || indent > owner {
                out.push(ScannedLine {
                    doc,
                    ..Default::default()
                });
                continue;
            }
            block_scalar_owner = None;
        }

        if line.starts_with("---") {
            doc += 1;
            stack.clear();
            out.push(ScannedLine {
                doc,
                ..Default::default()
            });
            continue;
        }

        if content.is_empty() || content.starts_with('#') || line.starts_with("...") {
            out.push(ScannedLine {
                doc,
                ..Default::default()
            });
            continue;
        }

        let mut column = indent;
        let mut rest = content;

        if rest == "-" || rest.starts_with("- ") {
            while let Some(top) = stack.last() {
                let is_item = matches!(top.segment, Segment::Index(_));
                if top.indent > column || (is_item && top.indent >= column) {
                    stack.pop();
                } else {
                    break;
                }
            }
            let index = match stack.last_mut() {
                Some(parent) => {
                    parent.items += 1;
                    parent.items - 1
                }
                None => 0,
            };
            stack.push(Frame {
                indent: column,
                segment: Segment::Index(index),
                items: 0,
            });

            let after = &rest[1..];
            column += 1 + (after.len() - after.trim_start().len());
            rest = after.trim_start();
        } else {
            while stack.last().is_some_and(|top| top.indent >= column) {
                stack.pop();
            }
        }

        let Some((key, after_colon)) = split_key(rest) else {
            if rest.starts_with('|') || rest.starts_with('>') {
                block_scalar_owner = Some(indent);
            }
            out.push(ScannedLine {
                doc,
                column,
                path: Some(stack.iter().map(|f| f.segment.clone()).collect()),
                has_key: false,
                value: None,
            });
            continue;
        };

        stack.push(Frame {
            indent: column,
            segment: Segment::Key(key),
            items: 0,
        });

        let value = value_span(line, column + after_colon);
        if let Some(span) = value {
            if matches!(line.as_bytes()[span.start], b'|' | b'>') {
                block_scalar_owner = Some(column);
            }
        }

        out.push(ScannedLine {
            doc,
            column,
            path: Some(stack.iter().map(|f| f.segment.clone()).collect()),
            has_key: true,
            value,
        });
    }

    out
}

fn key_path(keys: &[&str]) -> Vec<Segment> {
    keys.iter().map(|k| Segment::Key(k.to_string())).collect()
}

fn scalar<'a>(line: &'a str, span: Span) -> &'a str {
    let raw = &line[span.start..span.end];
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(raw)
}

/// Value of the key at exactly `path` within `doc`
fn doc_value<'a>(
    lines: &'a [String],
    scanned: &[ScannedLine],
    doc: usize,
    path: &[Segment],
) -> Option<&'a str> {
    scanned.iter().enumerate().find_map(|(i, s)| {
        (s.doc == doc && s.has_key && s.path.as_deref() == Some(path))
            .then(|| s.value.map(|v| scalar(&lines[i], v)))
            .flatten()
    })
}

fn locate_container(
    lines: &[String],
    scanned: &[ScannedLine],
    target: &WorkloadTarget,
    workload_kind: WorkloadKind,
) -> Option<ContainerLocation> {
    let containers = key_path(&["spec", "template", "spec", "containers"]);

    scanned.iter().enumerate().find_map(|(i, s)| {
        let path = s.path.as_ref()?;
        if !s.has_key
            || path.len() != containers.len() + 2
            || !path.starts_with(&containers)
            || path.last() != Some(&Segment::Key("name".into()))
            || s.value.map(|v| scalar(&lines[i], v)) != Some(target.container.as_str())
        {
            return None;
        }

        let kind = doc_value(lines, scanned, s.doc, &key_path(&["kind"]))?;
        let name = doc_value(lines, scanned, s.doc, &key_path(&["metadata", "name"]))?;
        let namespace = doc_value(lines, scanned, s.doc, &key_path(&["metadata", "namespace"]));

        let matches = WorkloadKind::from_manifest_kind(kind) == Some(workload_kind)
            && name == target.workload
            && namespace.is_none_or(|ns| ns == target.namespace);

        matches.then(|| ContainerLocation {
            doc: s.doc,
            prefix: path[..path.len() - 1].to_vec(),
            key_column: s.column,
        })
    })
}

fn find_line(scanned: &[ScannedLine], doc: usize, path: &[Segment]) -> Option<usize> {
    scanned
        .iter()
        .position(|s| s.doc == doc && s.has_key && s.path.as_deref() == Some(path))
}

/// Last line belonging to the block at `path` (the key line itself when empty)
fn block_end(scanned: &[ScannedLine], doc: usize, path: &[Segment]) -> Option<usize> {
    scanned
        .iter()
        .rposition(|s| s.doc == doc && s.path.as_ref().is_some_and(|p| p.starts_with(path)))
}

/// Column used by the first child of `path`, if it has any
fn child_column(scanned: &[ScannedLine], doc: usize, path: &[Segment]) -> Option<usize> {
    scanned.iter().find_map(|s| {
        let p = s.path.as_ref()?;
        (s.doc == doc && s.has_key && p.len() == path.len() + 1 && p.starts_with(path))
            .then_some(s.column)
    })
}

/// Turn `key: {}` into `key:` so children can be added below it
fn open_empty_flow_mapping(
    buffer: &mut LineBuffer,
    scanned: &[ScannedLine],
    line: usize,
) -> ManifestResult<()> {
    if let Some(span) = scanned[line].value {
        let text = &buffer.lines[line];
        if text[span.start..span.end].trim() != "{}" {
            return Err(ManifestError::Parse(format!(
                "unsupported inline value on line {}: {}",
                line + 1,
                text.trim()
            )));
        }
        let opened = text[..span.start].trim_end().to_string();
        buffer.lines[line] = opened;
    }
    Ok(())
}

fn quoted_like(original: &str, value: &str) -> String {
    match original.chars().next() {
        Some(q @ ('"' | '\'')) => format!("{}{}{}", q, value, q),
        _ => value.to_string(),
    }
}

/// Set `resources.<section>.<kind>` of the target container to `value`
fn set_field(
    buffer: &mut LineBuffer,
    target: &WorkloadTarget,
    workload_kind: WorkloadKind,
    section: &str,
    resource: ResourceKind,
    value: &str,
) -> ManifestResult<()> {
    let scanned = scan(&buffer.lines);
    let container = locate_container(&buffer.lines, &scanned, target, workload_kind)
        .ok_or_else(|| ManifestError::TargetNotFound(format!("{} ({})", target, workload_kind.as_str())))?;
    let doc = container.doc;
    let key = resource.manifest_key();

    let mut resources_path = container.prefix.clone();
    resources_path.push(Segment::Key("resources".into()));
    let mut section_path = resources_path.clone();
    section_path.push(Segment::Key(section.into()));
    let mut field_path = section_path.clone();
    field_path.push(Segment::Key(key.into()));

    // Existing field: replace the value token only
    if let Some(line) = find_line(&scanned, doc, &field_path) {
        let text = &buffer.lines[line];
        let updated = match scanned[line].value {
            Some(span) => {
                let original = &text[span.start..span.end];
                format!(
                    "{}{}{}",
                    &text[..span.start],
                    quoted_like(original, value),
                    &text[span.end..]
                )
            }
            None => format!("{} {}", text.trim_end(), value),
        };
        buffer.lines[line] = updated;
        return Ok(());
    }

    let step = DEFAULT_INDENT_STEP;

    if let Some(section_line) = find_line(&scanned, doc, &section_path) {
        open_empty_flow_mapping(buffer, &scanned, section_line)?;
        let column = child_column(&scanned, doc, &section_path)
            .unwrap_or(scanned[section_line].column + step);
        let after = block_end(&scanned, doc, &section_path).unwrap_or(section_line);
        buffer.insert(after + 1, format!("{}{}: {}", " ".repeat(column), key, value));
        return Ok(());
    }

    if let Some(resources_line) = find_line(&scanned, doc, &resources_path) {
        open_empty_flow_mapping(buffer, &scanned, resources_line)?;
        let column = child_column(&scanned, doc, &resources_path)
            .unwrap_or(scanned[resources_line].column + step);
        let after = block_end(&scanned, doc, &resources_path).unwrap_or(resources_line);
        buffer.insert(after + 1, format!("{}{}:", " ".repeat(column), section));
        buffer.insert(
            after + 2,
            format!("{}{}: {}", " ".repeat(column + step), key, value),
        );
        return Ok(());
    }

    let column = container.key_column;
    let after = block_end(&scanned, doc, &container.prefix).ok_or_else(|| {
        ManifestError::TargetNotFound(format!("{} ({})", target, workload_kind.as_str()))
    })?;
    buffer.insert(after + 1, format!("{}resources:", " ".repeat(column)));
    buffer.insert(after + 2, format!("{}{}:", " ".repeat(column + step), section));
    buffer.insert(
        after + 3,
        format!("{}{}: {}", " ".repeat(column + 2 * step), key, value),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"# Storefront API
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  namespace: shop
  labels:
    app: api   # owned by team-a
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: app
          image: "registry.local/api:1.4"
          args:
            - --port=8080
          resources:
            requests:
              cpu: "250m"   # tuned in Q1
              memory: 256Mi
            limits:
              cpu: "2"
              memory: 1Gi
        - name: sidecar
          image: envoy:v1
---
apiVersion: v1
kind: Service
metadata:
  name: api
spec:
  ports:
    - port: 80
"#;

    fn edit(container: &str, resource: ResourceKind, request: f64, limit: f64) -> FieldEdit {
        FieldEdit {
            target: WorkloadTarget::new("shop", "api", container),
            workload_kind: WorkloadKind::Deployment,
            resource,
            request,
            limit,
        }
    }

    #[test]
    fn rewrites_only_the_targeted_values() {
        let updated =
            ManifestUpdater::apply(DEPLOYMENT, &[edit("app", ResourceKind::Cpu, 0.576, 1.152)])
                .unwrap();

        let expected = DEPLOYMENT
            .replace(r#"cpu: "250m"   # tuned in Q1"#, r#"cpu: "576m"   # tuned in Q1"#)
            .replace(r#"cpu: "2""#, r#"cpu: "1152m""#);
        assert_eq!(updated, expected);
    }

    #[test]
    fn inserts_missing_resources_block() {
        let mib = 1024.0 * 1024.0;
        let updated = ManifestUpdater::apply(
            DEPLOYMENT,
            &[edit("sidecar", ResourceKind::Memory, 64.0 * mib, 128.0 * mib)],
        )
        .unwrap();

        assert!(updated.contains(
            "        - name: sidecar\n          image: envoy:v1\n          resources:\n            requests:\n              memory: 64Mi\n            limits:\n              memory: 128Mi\n---\n"
        ));
        // The first container is untouched
        assert!(updated.contains("              memory: 256Mi\n"));
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let edits = [
            edit("app", ResourceKind::Cpu, 0.576, 1.152),
            edit("sidecar", ResourceKind::Cpu, 0.1, 0.2),
        ];
        let once = ManifestUpdater::apply(DEPLOYMENT, &edits).unwrap();
        let twice = ManifestUpdater::apply(&once, &edits).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_target_fails_and_leaves_input_alone() {
        let input = DEPLOYMENT.to_string();
        let err = ManifestUpdater::apply(&input, &[edit("worker", ResourceKind::Cpu, 0.1, 0.2)])
            .unwrap_err();
        assert!(matches!(err, ManifestError::TargetNotFound(_)));
        assert_eq!(input, DEPLOYMENT);
    }

    #[test]
    fn namespace_and_kind_must_match() {
        let mut wrong_ns = edit("app", ResourceKind::Cpu, 0.1, 0.2);
        wrong_ns.target.namespace = "other".into();
        assert!(ManifestUpdater::apply(DEPLOYMENT, &[wrong_ns]).is_err());

        let mut wrong_kind = edit("app", ResourceKind::Cpu, 0.1, 0.2);
        wrong_kind.workload_kind = WorkloadKind::StatefulSet;
        assert!(ManifestUpdater::apply(DEPLOYMENT, &[wrong_kind]).is_err());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = ManifestUpdater::apply("kind: [Deployment\n", &[]).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn fills_empty_flow_mappings_and_compact_lists() {
        let doc = "kind: StatefulSet\nmetadata:\n  name: db\nspec:\n  template:\n    spec:\n      containers:\n      - name: postgres\n        resources: {}\n      volumes: []\n";
        let edit = FieldEdit {
            target: WorkloadTarget::new("data", "db", "postgres"),
            workload_kind: WorkloadKind::StatefulSet,
            resource: ResourceKind::Cpu,
            request: 0.5,
            limit: 1.0,
        };
        let updated = ManifestUpdater::apply(doc, &[edit]).unwrap();
        assert_eq!(
            updated,
            "kind: StatefulSet\nmetadata:\n  name: db\nspec:\n  template:\n    spec:\n      containers:\n      - name: postgres\n        resources:\n          requests:\n            cpu: 500m\n          limits:\n            cpu: 1\n      volumes: []\n"
        );
    }

    #[test]
    fn block_scalars_are_not_mistaken_for_keys() {
        let doc = "kind: Deployment\nmetadata:\n  name: job\nspec:\n  template:\n    spec:\n      containers:\n        - name: runner\n          command:\n            - sh\n          args:\n            - |\n              name: fake\n              resources: nope\n";
        assert!(document_contains(
            doc,
            &WorkloadTarget::new("default", "job", "runner"),
            WorkloadKind::Deployment
        )
        .unwrap());
        assert!(!document_contains(
            doc,
            &WorkloadTarget::new("default", "job", "fake"),
            WorkloadKind::Deployment
        )
        .unwrap());
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let doc = DEPLOYMENT.replace('\n', "\r\n");
        let updated =
            ManifestUpdater::apply(&doc, &[edit("sidecar", ResourceKind::Cpu, 0.1, 0.2)]).unwrap();
        assert!(!updated.replace("\r\n", "").contains('\n'));
        assert!(updated.contains("              cpu: 100m\r\n"));
    }

    #[test]
    fn capped_limit_in_decimal_units_is_not_exceeded() {
        let doc = DEPLOYMENT.replace("memory: 1Gi", "memory: 1G");
        let updated =
            ManifestUpdater::apply(&doc, &[edit("app", ResourceKind::Memory, 8.4e8, 1e9)]).unwrap();

        assert!(updated.contains("              memory: 802Mi\n            limits:"));
        assert!(updated.contains("              memory: 953Mi\n        - name: sidecar"));

        let declared = declared_resources(
            &updated,
            &WorkloadTarget::new("shop", "api", "app"),
            WorkloadKind::Deployment,
            ResourceKind::Memory,
        )
        .unwrap()
        .unwrap();
        assert!(declared.limit.unwrap() <= 1e9);
        assert!(declared.request.unwrap() <= declared.limit.unwrap());
    }

    #[test]
    fn reads_declared_resources_of_the_container() {
        let target = WorkloadTarget::new("shop", "api", "app");
        let cpu = declared_resources(DEPLOYMENT, &target, WorkloadKind::Deployment, ResourceKind::Cpu)
            .unwrap()
            .unwrap();
        assert_eq!(cpu.request, Some(0.25));
        assert_eq!(cpu.limit, Some(2.0));

        let sidecar = WorkloadTarget::new("shop", "api", "sidecar");
        let memory =
            declared_resources(DEPLOYMENT, &sidecar, WorkloadKind::Deployment, ResourceKind::Memory)
                .unwrap()
                .unwrap();
        assert_eq!(memory.request, None);
        assert_eq!(memory.limit, None);

        let missing = WorkloadTarget::new("shop", "api", "worker");
        assert_eq!(
            declared_resources(DEPLOYMENT, &missing, WorkloadKind::Deployment, ResourceKind::Cpu)
                .unwrap(),
            None
        );
    }

    #[test]
    fn finds_manifest_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("apps/api")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("apps/api/deploy.yaml"), DEPLOYMENT).unwrap();
        fs::write(dir.path().join("kustomization.yml"), "resources: []\n").unwrap();
        fs::write(dir.path().join(".git/config.yaml"), "x: 1\n").unwrap();
        fs::write(dir.path().join("README.md"), "# hi\n").unwrap();

        let files = find_manifest_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.to_string_lossy().contains(".git")));
    }
}
