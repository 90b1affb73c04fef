//! What training leaves behind in a model directory: the `cfg_args` dump of the
//! training options and one `point_cloud/iteration_<n>` directory per saved step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    None,
    /// Lists, tuples and anything else kept as written.
    Raw(String),
}

impl ArgValue {
    fn parse(text: &str) -> ArgValue {
        let text = text.trim();
        for quote in ['\'', '"'] {
            if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
                return ArgValue::Str(unescape(&text[1..text.len() - 1]));
            }
        }
        match text {
            "True" => ArgValue::Bool(true),
            "False" => ArgValue::Bool(false),
            "None" => ArgValue::None,
            _ => {
                if let Ok(v) = text.parse() {
                    ArgValue::Int(v)
                } else if let Ok(v) = text.parse() {
                    ArgValue::Float(v)
                } else {
                    ArgValue::Raw(text.to_owned())
                }
            }
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits `key=value, key=value` at commas outside of quotes and brackets.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0usize;
    let mut quote = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Parses a dump like `Namespace(source_path='/data/scene', eval=True, end_frame=-1)`.
pub fn parse_cfg_args(text: &str) -> Result<HashMap<String, ArgValue>> {
    let text = text.trim();
    let body = text
        .strip_prefix("Namespace(")
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| PipelineError::InvalidArgs("expected Namespace(...)".to_owned()))?;

    let mut args = HashMap::new();
    for part in split_top_level(body) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| PipelineError::InvalidArgs(format!("no value in `{part}`")))?;
        args.insert(key.trim().to_owned(), ArgValue::parse(value));
    }
    Ok(args)
}

/// The training options that decide how a scene is loaded again for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelArgs {
    pub source_path: Option<String>,
    pub images: Option<String>,
    pub white_background: Option<bool>,
    pub eval: Option<bool>,
    pub end_frame: Option<i64>,
    pub resolution: Option<i64>,
}

impl ModelArgs {
    pub fn from_namespace(args: &HashMap<String, ArgValue>) -> Self {
        let string = |key: &str| match args.get(key) {
            Some(ArgValue::Str(s)) => Some(s.clone()),
            _ => None,
        };
        let flag = |key: &str| match args.get(key) {
            Some(ArgValue::Bool(b)) => Some(*b),
            _ => None,
        };
        let int = |key: &str| match args.get(key) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        };

        Self {
            source_path: string("source_path"),
            images: string("images"),
            white_background: flag("white_background"),
            eval: flag("eval"),
            end_frame: int("end_frame"),
            resolution: int("resolution"),
        }
    }
}

/// Reads `<model>/cfg_args`. A model without one loads with command line values only.
pub async fn read_model_args(model_path: &Path) -> Result<ModelArgs> {
    let path = model_path.join("cfg_args");
    if !tokio::fs::try_exists(&path).await? {
        warn!("No cfg_args in {}, using command line options only", model_path.display());
        return Ok(ModelArgs::default());
    }
    debug!("Reading training options from {}", path.display());
    let text = tokio::fs::read_to_string(&path).await?;
    Ok(ModelArgs::from_namespace(&parse_cfg_args(&text)?))
}

/// Saved iterations under `<model>/point_cloud`, ascending.
pub async fn saved_iterations(model_path: &Path) -> Result<Vec<u32>> {
    let dir = model_path.join("point_cloud");
    if !tokio::fs::try_exists(&dir).await? {
        return Ok(vec![]);
    }

    let mut entries = tokio::fs::read_dir(&dir).await?;
    let mut iterations = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(iteration) = name
            .to_str()
            .and_then(|n| n.strip_prefix("iteration_"))
            .and_then(|n| n.parse().ok())
        else {
            continue;
        };
        if entry.file_type().await?.is_dir() {
            iterations.push(iteration);
        }
    }
    iterations.sort_unstable();
    Ok(iterations)
}

/// Resolves `-1` (or any negative value) to the latest saved iteration, otherwise
/// checks that the requested one was saved.
pub async fn resolve_iteration(model_path: &Path, iteration: i32) -> Result<u32> {
    let saved = saved_iterations(model_path).await?;
    if iteration < 0 {
        return saved
            .last()
            .copied()
            .ok_or_else(|| PipelineError::NoIterations(model_path.to_path_buf()));
    }

    let iteration = iteration as u32;
    if saved.contains(&iteration) {
        Ok(iteration)
    } else {
        Err(PipelineError::MissingIteration {
            model: model_path.to_path_buf(),
            iteration,
        })
    }
}

pub fn iteration_dir(model_path: &Path, iteration: u32) -> PathBuf {
    model_path.join("point_cloud").join(format!("iteration_{iteration}"))
}
