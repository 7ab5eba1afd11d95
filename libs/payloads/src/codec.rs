//! Strict YAML codec for command and failure payloads.

use drover_id::InstanceUuid;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::command::{Command, CommandKind, InstanceTarget, StartCommand};
use crate::error::{DecodeError, EncodeError};
use crate::failure::{FailurePayload, FailureReason};

/// A payload section with fields that must be present.
///
/// Presence is checked before deserialization so a missing field is
/// reported by name rather than as a generic serde message.
trait Section: DeserializeOwned {
    const REQUIRED: &'static [&'static str];
}

impl Section for InstanceTarget {
    const REQUIRED: &'static [&'static str] = &["instance_uuid", "workload_agent_uuid"];
}

impl Section for StartCommand {
    const REQUIRED: &'static [&'static str] =
        &["instance_uuid", "workload_agent_uuid", "image_uuid"];
}

impl<R: FailureReason> Section for FailurePayload<R> {
    const REQUIRED: &'static [&'static str] = &["instance_uuid", "reason"];
}

/// Decode a command payload.
pub fn decode(bytes: &[u8]) -> Result<Command, DecodeError> {
    let (kind, body) = split_envelope(bytes)?;
    let section = kind.as_str();

    let command = match kind {
        CommandKind::Start => Command::Start(decode_section(section, body)?),
        CommandKind::Stop => Command::Stop(decode_section(section, body)?),
        CommandKind::Restart => Command::Restart(decode_section(section, body)?),
        CommandKind::Delete => Command::Delete(decode_section(section, body)?),
    };

    Ok(command)
}

/// Decode a command payload that arrived in a frame of a known kind.
pub fn decode_as(expected: CommandKind, bytes: &[u8]) -> Result<Command, DecodeError> {
    let command = decode(bytes)?;
    if command.kind() != expected {
        return Err(DecodeError::KindMismatch {
            expected: expected.as_str(),
            found: command.kind().as_str(),
        });
    }
    Ok(command)
}

/// Encode a command payload.
pub fn encode_command(command: &Command) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_yaml::to_string(command)?.into_bytes())
}

/// Decode a failure payload of one taxonomy.
pub fn decode_failure<R: FailureReason>(bytes: &[u8]) -> Result<FailurePayload<R>, DecodeError> {
    let value: Value = serde_yaml::from_slice(bytes)?;
    decode_section(R::KIND.as_str(), value)
}

/// Encode a failure payload.
pub fn encode_failure<R: FailureReason>(
    payload: &FailurePayload<R>,
) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_yaml::to_string(payload)?.into_bytes())
}

/// Best-effort extraction of the instance a payload refers to.
///
/// Used to attribute decode failures; looks at a top-level
/// `instance_uuid` or one nested under the first key.
pub fn recover_instance_uuid(bytes: &[u8]) -> Option<InstanceUuid> {
    let value: Value = serde_yaml::from_slice(bytes).ok()?;
    let mapping = value.as_mapping()?;

    let nested = mapping
        .values()
        .next()
        .and_then(Value::as_mapping)
        .and_then(|section| section.get("instance_uuid"));

    mapping
        .get("instance_uuid")
        .or(nested)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn split_envelope(bytes: &[u8]) -> Result<(CommandKind, Value), DecodeError> {
    let value: Value = serde_yaml::from_slice(bytes)?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Err(DecodeError::Empty),
        _ => return Err(DecodeError::NotAMapping),
    };

    if mapping.len() > 1 {
        return Err(DecodeError::UnexpectedKeys(
            mapping.keys().map(key_name).collect(),
        ));
    }

    let Some((key, body)) = mapping.into_iter().next() else {
        return Err(DecodeError::Empty);
    };

    let name = key_name(&key);
    let kind = name
        .parse::<CommandKind>()
        .map_err(DecodeError::UnknownCommand)?;

    Ok((kind, body))
}

fn decode_section<T: Section>(section: &'static str, body: Value) -> Result<T, DecodeError> {
    let fields = match &body {
        Value::Mapping(fields) => fields.clone(),
        Value::Null => Mapping::new(),
        _ => {
            return Err(DecodeError::InvalidField {
                section,
                message: "section must be a mapping".to_string(),
            })
        }
    };

    if let Some(field) = T::REQUIRED
        .iter()
        .copied()
        .find(|f| !fields.contains_key(*f))
    {
        return Err(DecodeError::MissingField { section, field });
    }

    serde_yaml::from_value(Value::Mapping(fields)).map_err(|e| DecodeError::InvalidField {
        section,
        message: e.to_string(),
    })
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{other:?}")),
    }
}
