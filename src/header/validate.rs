//! Strict validation of the merged header.
//!
//! Every rejection is written for the person editing the document and names
//! the offending interlocutor, kit, or field. Unknown top-level keys are
//! ignored; unknown interlocutor keys are errors (enforced by serde's
//! `deny_unknown_fields` on [`Interlocutor`]).

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::Value;

use crate::error::LecticError;

use super::merge::merge_values;
use super::types::{
    Header, HookDef, HookSpec, Interlocutor, KitSpec, MacroSpec,
};

type Result<T> = std::result::Result<T, LecticError>;

fn header_err(msg: impl Into<String>) -> LecticError {
    LecticError::Header(msg.into())
}

impl Header {
    /// Validates a merged YAML value into an effective [`Header`].
    ///
    /// `base_dir` anchors relative prompt paths (normally the document's
    /// directory).
    pub fn from_value(value: Value, base_dir: &Path) -> Result<Self> {
        let map = value
            .as_mapping()
            .ok_or_else(|| header_err("The header must be a YAML mapping"))?;

        let single = map.get(Value::from("interlocutor"));
        let many = map.get(Value::from("interlocutors"));

        let mut raw_entries: Vec<Value> = Vec::new();
        match many {
            None => {}
            Some(Value::Sequence(seq)) => raw_entries.extend(seq.iter().cloned()),
            Some(_) => {
                return Err(header_err(
                    "The `interlocutors` field must be a sequence of interlocutors",
                ))
            }
        }

        if let Some(one) = single {
            if !one.is_mapping() {
                return Err(header_err("The `interlocutor` field must be a mapping"));
            }
            let single_name = one
                .as_mapping()
                .and_then(|m| m.get(Value::from("name")))
                .and_then(Value::as_str);
            // A single `interlocutor` sharing a name with a list entry
            // overrides that entry and inherits its unspecified fields;
            // it also becomes the default speaker.
            let position = single_name.and_then(|n| {
                raw_entries.iter().position(|e| {
                    e.as_mapping()
                        .and_then(|m| m.get(Value::from("name")))
                        .and_then(Value::as_str)
                        .is_some_and(|en| en.eq_ignore_ascii_case(n))
                })
            });
            match position {
                Some(i) => {
                    let base = raw_entries.remove(i);
                    raw_entries.insert(0, merge_values(base, one.clone()));
                }
                None => raw_entries.insert(0, one.clone()),
            }
        }

        if raw_entries.is_empty() {
            return Err(header_err(
                "No interlocutor is defined. Add an `interlocutor` (or a non-empty \
                 `interlocutors` list) to the header or a config file.",
            ));
        }

        let mut interlocutors = Vec::with_capacity(raw_entries.len());
        for entry in raw_entries {
            interlocutors.push(parse_interlocutor(entry, base_dir)?);
        }

        for (i, a) in interlocutors.iter().enumerate() {
            if let Some(b) = interlocutors[i + 1..]
                .iter()
                .find(|b| b.name.eq_ignore_ascii_case(&a.name))
            {
                return Err(header_err(format!(
                    "Interlocutor names must be unique (case-insensitively), \
                     but '{}' and '{}' collide",
                    a.name, b.name
                )));
            }
        }

        let macros: Vec<MacroSpec> = parse_field(map, "macros", "macro definitions")?;
        let hooks: Vec<HookSpec> = parse_field(map, "hooks", "hooks")?;
        let kits: Vec<KitSpec> = parse_field(map, "kits", "kits")?;
        let hook_defs: Vec<HookDef> = parse_field(map, "hook_defs", "hook definitions")?;
        let env_defs: BTreeMap<String, BTreeMap<String, String>> =
            parse_field(map, "env_defs", "environment definitions")?;
        let sandbox_defs: BTreeMap<String, String> =
            parse_field(map, "sandbox_defs", "sandbox definitions")?;

        for def in &hook_defs {
            if def.name.is_none() {
                return Err(header_err(
                    "Every entry in `hook_defs` needs a `name` so hooks can reference it",
                ));
            }
        }

        for (i, m) in macros.iter().enumerate() {
            if !crate::parser::is_directive_name(&m.name) {
                return Err(header_err(format!(
                    "Macro name '{}' is not a valid directive name",
                    m.name
                )));
            }
            if macros[i + 1..].iter().any(|o| o.name == m.name) {
                return Err(header_err(format!("Macro '{}' is defined twice", m.name)));
            }
        }

        let header = Header {
            interlocutors,
            macros,
            hooks,
            kits,
            hook_defs,
            env_defs,
            sandbox_defs,
        };
        super::kits::check_kits(&header)?;

        for i in &header.interlocutors {
            for spec in &i.tools {
                if let super::types::ToolSpec::Agent(a) = spec {
                    if header.find(&a.agent).is_none() {
                        return Err(header_err(format!(
                            "Interlocutor '{}' has an agent tool for '{}', \
                             but no interlocutor has that name",
                            i.name, a.agent
                        )));
                    }
                }
            }
        }

        Ok(header)
    }
}

/// Deserializes an optional top-level field, defaulting when absent.
fn parse_field<T>(map: &serde_yaml::Mapping, key: &str, what: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match map.get(Value::from(key)) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_yaml::from_value(v.clone())
            .map_err(|e| header_err(format!("The `{key}` field does not hold valid {what}: {e}"))),
    }
}

fn parse_interlocutor(entry: Value, base_dir: &Path) -> Result<Interlocutor> {
    let name = entry
        .as_mapping()
        .and_then(|m| m.get(Value::from("name")))
        .and_then(Value::as_str)
        .map(str::to_string);

    let Some(name) = name else {
        return Err(header_err(
            "Every interlocutor needs a `name` field holding a string",
        ));
    };
    if !crate::parser::is_speaker_name(&name) {
        return Err(header_err(format!(
            "Interlocutor name '{name}' is not usable in a `::: {name}` fence"
        )));
    }

    let mut interlocutor: Interlocutor = serde_yaml::from_value(entry)
        .map_err(|e| header_err(format!("Interlocutor '{name}': {e}")))?;

    if interlocutor.prompt.trim().is_empty() {
        return Err(header_err(format!(
            "Interlocutor '{name}' needs a non-empty `prompt`"
        )));
    }
    if let Some(t) = interlocutor.temperature {
        if !(0.0..=1.0).contains(&t) {
            return Err(header_err(format!(
                "Interlocutor '{name}' has temperature {t}, but it must lie in [0, 1]"
            )));
        }
    }

    // A prompt that names a readable file is loaded from disk.
    let candidate = crate::paths::expand_user_path(interlocutor.prompt.trim());
    let path = if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    };
    if !interlocutor.prompt.contains('\n') && path.is_file() {
        interlocutor.prompt = std::fs::read_to_string(&path).map_err(|e| {
            header_err(format!(
                "Interlocutor '{name}': failed to read prompt file {}: {e}",
                path.display()
            ))
        })?;
    }

    Ok(interlocutor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(s: &str) -> Result<Header> {
        Header::from_value(serde_yaml::from_str(s).unwrap(), Path::new("."))
    }

    #[test]
    fn minimal_header_validates() {
        let h = from_yaml("interlocutor: {name: Bot, prompt: be nice}").unwrap();
        assert_eq!(h.speaker().name, "Bot");
        assert_eq!(h.speaker().max_tool_use, 10);
    }

    #[test]
    fn missing_interlocutor_is_an_error() {
        let err = from_yaml("macros: []").unwrap_err();
        assert!(err.to_string().contains("No interlocutor"));
    }

    #[test]
    fn missing_prompt_is_an_error() {
        let err = from_yaml("interlocutor: {name: Bot}").unwrap_err();
        assert!(err.to_string().contains("Bot"));
    }

    #[test]
    fn unknown_interlocutor_key_is_an_error() {
        let err = from_yaml("interlocutor: {name: Bot, prompt: p, modle: oops}").unwrap_err();
        assert!(err.to_string().contains("Bot"));
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        assert!(from_yaml(
            "interlocutor: {name: Bot, prompt: p}\nsome_future_field: 12"
        )
        .is_ok());
    }

    #[test]
    fn temperature_out_of_range() {
        let err =
            from_yaml("interlocutor: {name: Bot, prompt: p, temperature: 1.5}").unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn duplicate_names_differing_in_case_are_rejected() {
        let err = from_yaml(
            "interlocutors: [{name: bot, prompt: p}, {name: Bot, prompt: q}]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unique"));
    }

    #[test]
    fn single_overrides_matching_list_entry() {
        let h = from_yaml(
            "interlocutor: {name: B, temperature: 0.5, prompt: p2}\n\
             interlocutors: [{name: A, prompt: pa}, {name: B, prompt: pb, model: m}]",
        )
        .unwrap();
        // The single entry becomes the default speaker and inherits `model`.
        assert_eq!(h.speaker().name, "B");
        assert_eq!(h.speaker().model.as_deref(), Some("m"));
        assert_eq!(h.speaker().prompt, "p2");
        assert_eq!(h.speaker().temperature, Some(0.5));
        assert_eq!(h.interlocutors.len(), 2);
    }

    #[test]
    fn agent_tool_must_reference_known_interlocutor() {
        let err = from_yaml(
            "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - agent: Ghost",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn tool_specs_deserialize_by_discriminator() {
        let h = from_yaml(
            "interlocutor:\n  name: Bot\n  prompt: p\n  tools:\n    - exec: \"date -u\"\n    - sqlite: data.db\n      readonly: true\n    - think_about: the plan\n    - native: search\n    - kit: web",
        );
        // Kit reference is unresolved, so validation fails on the kit, not
        // the tool shapes.
        assert!(h.unwrap_err().to_string().contains("web"));
    }
}
