use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Maximum `{% include %}` nesting.
const MAX_INCLUDE_DEPTH: usize = 3;

/// Built-in fallback used when `<prompts_dir>/master.md` is absent.
const DEFAULT_MASTER_PROMPT: &str = "\
You are {{ agent_name }}, an agent connected to the TalkTo hub at {{ base_url }}.

Your home channel is {{ project_channel }}. You are also in #general.

Ground rules:
- Call get_messages regularly to see what you have missed.
- Reply when addressed by name or DM; keep answers short and concrete.
- Call heartbeat every 30 seconds or so while you are active.
- Use update_profile to tell others what you are working on.
{% if onboarding_prompt %}
Workspace notes:
{{ onboarding_prompt }}
{% endif %}";

/// Built-in fallback used when `<prompts_dir>/inject.md` is absent.
const DEFAULT_INJECT_PROMPT: &str = "\
New activity on TalkTo for {{ agent_name }}. Check {{ project_channel }} with
get_messages and respond to anything addressed to you before resuming work.";

/// Loads prompt templates from a directory of `*.md` files and renders them.
/// Supported syntax: `{{ var }}` substitution, `{% include 'file' %}`, and
/// `{% if var %}…{% endif %}` where an empty or whitespace value is falsy.
pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn new(dir: &Path) -> Self {
        PromptStore {
            dir: dir.to_path_buf(),
        }
    }

    fn render_named(&self, file: &str, fallback: &str, vars: &HashMap<String, String>) -> String {
        match std::fs::read_to_string(self.dir.join(file)) {
            Ok(template) => render_with_includes(&template, vars, Some(&self.dir), 0),
            Err(_) => render_with_includes(fallback, vars, None, 0),
        }
    }

    pub fn master_prompt(&self, vars: &HashMap<String, String>) -> String {
        self.render_named("master.md", DEFAULT_MASTER_PROMPT, vars)
    }

    pub fn inject_prompt(&self, vars: &HashMap<String, String>) -> String {
        self.render_named("inject.md", DEFAULT_INJECT_PROMPT, vars)
    }
}

/// Pure render: substitution and `{% if %}` only (no filesystem access).
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    render_with_includes(template, vars, None, 0)
}

fn render_with_includes(
    template: &str,
    vars: &HashMap<String, String>,
    dir: Option<&Path>,
    depth: usize,
) -> String {
    let expanded = expand_includes(template, vars, dir, depth);
    let conditioned = apply_conditionals(&expanded, vars);
    substitute(&conditioned, vars)
}

fn expand_includes(
    template: &str,
    vars: &HashMap<String, String>,
    dir: Option<&Path>,
    depth: usize,
) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(i) = rest.find("{% include ") {
        result.push_str(&rest[..i]);
        let after = &rest[i + "{% include ".len()..];
        let Some(end) = after.find("%}") else {
            result.push_str(&rest[i..]);
            return result;
        };
        let target = after[..end].trim().trim_matches(|c| c == '\'' || c == '"');
        if depth < MAX_INCLUDE_DEPTH
            && let Some(d) = dir
            && let Ok(content) = std::fs::read_to_string(d.join(target))
        {
            result.push_str(&expand_includes(&content, vars, dir, depth + 1));
        }
        rest = &after[end + 2..];
    }
    result.push_str(rest);
    result
}

/// Resolve `{% if var %}…{% endif %}` blocks, innermost first so nesting
/// works. Empty or whitespace-only values count as falsy.
fn apply_conditionals(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    loop {
        let Some(endif) = out.find("{% endif %}") else {
            break;
        };
        let Some(start) = out[..endif].rfind("{% if ") else {
            // stray endif: drop it so the scan can finish
            out.replace_range(endif..endif + "{% endif %}".len(), "");
            continue;
        };
        let Some(cond_close) = out[start..endif].find("%}") else {
            out.replace_range(endif..endif + "{% endif %}".len(), "");
            continue;
        };
        let var = out[start + "{% if ".len()..start + cond_close].trim().to_string();
        let truthy = vars.get(&var).map(|v| !v.trim().is_empty()).unwrap_or(false);
        let body = if truthy {
            out[start + cond_close + 2..endif].to_string()
        } else {
            String::new()
        };
        out.replace_range(start..endif + "{% endif %}".len(), &body);
    }
    out
}

fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(i) = rest.find("{{") {
        result.push_str(&rest[..i]);
        match rest[i + 2..].find("}}") {
            Some(j) => {
                let name = rest[i + 2..i + 2 + j].trim();
                if let Some(value) = vars.get(name) {
                    result.push_str(value);
                }
                rest = &rest[i + 2 + j + 2..];
            }
            None => {
                result.push_str(&rest[i..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}
