//! Execution-resource templates and the rendering utility.
//!
//! Templates are configuration, not algorithm: YAML documents with
//! `{{key}}` placeholders, substituted textually and parsed into an object
//! envelope before being handed to apply. A placeholder left unresolved is
//! a malformed template and fails the render.

use std::collections::BTreeMap;

use forge_core::object::Envelope;

use crate::error::{Error, Result};

/// Named string parameters for a template render.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: BTreeMap<String, String>,
}

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, returning the set for chaining.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

/// Renders a template into an object envelope.
///
/// # Errors
///
/// Fails when a placeholder stays unresolved or the substituted document is
/// not a well-formed object.
pub fn render(tpl: &str, params: &Params) -> Result<Envelope> {
    let mut text = tpl.to_string();
    for (key, value) in &params.values {
        text = text.replace(&format!("{{{{{key}}}}}"), value);
    }

    if let Some(pos) = text.find("{{") {
        let tail: String = text[pos..].chars().take(40).collect();
        return Err(Error::template(format!("unresolved placeholder at `{tail}`")));
    }

    let value: serde_json::Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::template(format!("template is not valid yaml: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| Error::template(format!("template is not a valid object: {e}")))
}

/// Reusable build task.
pub const TASK_TPL: &str = r#"
apiVersion: pipeline.forge.dev/v1alpha1
kind: Task
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
spec:
  inputs:
    resources:
      - name: source
        type: git
    params:
      - name: codeType
        type: string
        default: none
      - name: command
        type: string
        default: ""
  steps:
    - name: step1
      image: "{{buildToolImage}}"
      workingDir: /workspace/source
      command: ["forge-build"]
      args:
        - "--code-type=$(inputs.params.codeType)"
    - name: step2
      image: "{{buildToolImage}}"
      workingDir: /workspace/source
      command: ["sh", "-c"]
      args:
        - "$(inputs.params.command)"
"#;

/// Reusable pipeline referencing the task and the shared graph.
pub const PIPELINE_TPL: &str = r#"
apiVersion: pipeline.forge.dev/v1alpha1
kind: Pipeline
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
  annotations:
    graph.forge.dev/name: "{{graphName}}"
spec:
  resources:
    - name: source
      type: git
  params:
    - name: codeType
      type: string
      default: none
    - name: command
      type: string
      default: ""
  tasks:
    - name: build
      taskRef:
        name: "{{taskName}}"
      params:
        - name: codeType
          value: "$(params.codeType)"
        - name: command
          value: "$(params.command)"
      resources:
        inputs:
          - name: source
            resource: source
"#;

/// Per-run git checkout reference.
pub const PIPELINE_RESOURCE_TPL: &str = r#"
apiVersion: pipeline.forge.dev/v1alpha1
kind: PipelineResource
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
spec:
  type: git
  params:
    - name: url
      value: "{{gitUrl}}"
    - name: revision
      value: "{{branch}}"
"#;

/// Per-run pipeline run.
pub const PIPELINE_RUN_TPL: &str = r#"
apiVersion: pipeline.forge.dev/v1alpha1
kind: PipelineRun
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
  annotations:
    graph.forge.dev/name: "{{runGraphName}}"
spec:
  serviceAccountName: default
  pipelineRef:
    name: "{{pipelineName}}"
  params:
    - name: projectName
      value: "{{projectName}}"
    - name: projectVersion
      value: "{{projectVersion}}"
    - name: destRepo
      value: "{{destRepo}}"
    - name: cacheRepo
      value: "{{cacheRepo}}"
    - name: codeType
      value: "{{codeType}}"
    - name: command
      value: "{{command}}"
  resources:
    - name: source
      resourceRef:
        name: "{{resourceName}}"
"#;

/// Structural descriptor of a pipeline or run.
pub const GRAPH_TPL: &str = r#"
apiVersion: graph.forge.dev/v1
kind: FlowGraph
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
spec:
  nodes: []
  edges: []
"#;

/// Git credentials secret, referenced from the default service account.
pub const GIT_SECRET_TPL: &str = r#"
apiVersion: v1
kind: Secret
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
  annotations:
    forge.dev/git-server: "{{gitServer}}"
type: forge.dev/basic-auth
stringData:
  username: "{{username}}"
  password: "{{password}}"
spec:
  server: "{{gitServer}}"
"#;

/// Registry credentials secret, referenced from the default service account.
pub const REGISTRY_SECRET_TPL: &str = r#"
apiVersion: v1
kind: Secret
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
  annotations:
    forge.dev/registry-server: "{{registryServer}}"
type: forge.dev/basic-auth
stringData:
  username: "{{username}}"
  password: "{{password}}"
spec:
  server: "{{registryServer}}"
"#;

/// CD deployment-style rollout.
pub const ROLLOUT_TPL: &str = r#"
apiVersion: apps.forge.dev/v1
kind: Rollout
metadata:
  name: "{{name}}"
  namespace: "{{namespace}}"
  labels:
    forge.dev/intent: "{{intentName}}"
spec:
  replicas: {{replicas}}
  serviceType: ClusterIP
  template:
    spec:
      containers:
        - name: "{{name}}"
          image: "{{image}}"
          command: {{commandJson}}
          args: {{argsJson}}
          env: {{envJson}}
          ports: {{portsJson}}
          volumeMounts: {{volumeMountsJson}}
          resources:
            limits:
              cpu: "{{cpuLimit}}"
              memory: "{{memLimit}}"
            requests:
              cpu: "{{cpuRequests}}"
              memory: "{{memRequests}}"
"#;
