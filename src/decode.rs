use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    types::{Completion, PackageMetadata, TokenUsage},
    wire, PkgScoutError,
};

pub(crate) fn decode_packument_value(value: Value) -> Result<PackageMetadata, PkgScoutError> {
    let packument: wire::Packument = serde_json::from_value(value)
        .map_err(|err| PkgScoutError::Parse(format!("invalid package document: {err}")))?;
    Ok(decode_package_metadata(packument))
}

pub(crate) fn decode_package_metadata(packument: wire::Packument) -> PackageMetadata {
    let wire::Packument {
        name,
        description,
        mut dist_tags,
        homepage,
        license,
        repository,
        time,
        versions,
    } = packument;

    PackageMetadata {
        name,
        description: description.filter(|text| !text.trim().is_empty()),
        latest_version: dist_tags.remove("latest"),
        homepage,
        license: license.as_ref().and_then(|value| string_or_field(value, "type")),
        repository_url: repository
            .as_ref()
            .and_then(|value| string_or_field(value, "url")),
        version_count: versions.len(),
        created: time.get("created").and_then(|at| parse_timestamp(at)),
        modified: time.get("modified").and_then(|at| parse_timestamp(at)),
    }
}

pub(crate) fn decode_completion(
    response: wire::CompletionResponse,
) -> Result<Completion, PkgScoutError> {
    let wire::CompletionResponse {
        id,
        model,
        choices,
        usage,
    } = response;

    let choice = choices
        .into_iter()
        .next()
        .ok_or_else(|| PkgScoutError::Parse("completion response has no choices".to_owned()))?;
    let content = choice.message.content.ok_or_else(|| {
        PkgScoutError::Parse("completion choice is missing message content".to_owned())
    })?;

    Ok(Completion {
        id,
        model,
        content,
        finish_reason: choice.finish_reason,
        usage: usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }),
    })
}

fn string_or_field(value: &Value, field: &str) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get(field)?.as_str().map(str::to_owned),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_completion, decode_packument_value};
    use crate::{wire, PkgScoutError};

    #[test]
    fn packument_fields_are_flattened() {
        let metadata = decode_packument_value(json!({
            "name": "left-pad",
            "description": "String left pad",
            "dist-tags": { "latest": "1.3.0", "next": "2.0.0-rc.1" },
            "license": { "type": "WTFPL" },
            "repository": { "type": "git", "url": "git+https://github.com/stevemao/left-pad.git" },
            "time": {
                "created": "2014-03-14T22:38:40.573Z",
                "modified": "2022-06-19T11:12:32.456Z"
            },
            "versions": { "1.2.0": {}, "1.3.0": {} }
        }))
        .expect("packument must decode");

        assert_eq!(metadata.name, "left-pad");
        assert_eq!(metadata.latest_version.as_deref(), Some("1.3.0"));
        assert_eq!(metadata.license.as_deref(), Some("WTFPL"));
        assert_eq!(
            metadata.repository_url.as_deref(),
            Some("git+https://github.com/stevemao/left-pad.git")
        );
        assert_eq!(metadata.version_count, 2);
        assert!(metadata.created.is_some());
        assert!(metadata.modified > metadata.created);
    }

    #[test]
    fn sparse_packument_decodes_with_defaults() {
        let metadata = decode_packument_value(json!({ "name": "tiny", "description": "  " }))
            .expect("sparse packument must decode");
        assert_eq!(metadata.description, None);
        assert_eq!(metadata.latest_version, None);
        assert_eq!(metadata.version_count, 0);
    }

    #[test]
    fn packument_without_name_is_a_parse_error() {
        let err = decode_packument_value(json!({ "error": "not found" }))
            .expect_err("missing name must fail");
        assert!(matches!(err, PkgScoutError::Parse(_)));
    }

    #[test]
    fn completion_without_choices_is_a_parse_error() {
        let response: wire::CompletionResponse =
            serde_json::from_value(json!({ "id": "cmpl-1", "choices": [] })).unwrap();
        assert!(matches!(
            decode_completion(response),
            Err(PkgScoutError::Parse(_))
        ));
    }
}
