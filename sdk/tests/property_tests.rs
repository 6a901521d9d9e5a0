use proptest::prelude::*;
use sdk::errors::{EngineError, ForgeErrorExt};
use sdk::types::{AbilityArgs, AbilityDescriptor, AbilityOutput, AbilityParameter};

// Hints are static and never echo the underlying cause
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-z]{8,32}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::UnknownAbility(error_str.clone()),
            EngineError::execution(error_str.clone(), error_str.clone()),
            EngineError::Transport { attempts: 3, cause: error_str.clone() },
            EngineError::MalformedResponse(error_str.clone()),
            EngineError::PathOutsideWorkspace(std::path::PathBuf::from(&error_str)),
            EngineError::TaskNotFound(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Catalog lines keep parameter order and end with the usage clause
proptest! {
    #[test]
    fn test_descriptor_line_shape(
        name in "[a-z_]{1,16}",
        params in proptest::collection::vec("[a-z_]{1,12}", 0..5),
        description in "[A-Za-z ]{1,40}",
    ) {
        let mut descriptor = AbilityDescriptor::new(name.clone(), description.clone(), "str");
        for p in &params {
            descriptor = descriptor.with_parameter(AbilityParameter::required(p.clone(), "string", ""));
        }

        let line = descriptor.to_string();
        let expected_params = params
            .iter()
            .map(|p| format!("{}: string", p))
            .collect::<Vec<_>>()
            .join(", ");
        let expected_prefix = format!("{}({})", name, expected_params);
        let expected_suffix = format!("Usage: {},", description);
        prop_assert!(line.starts_with(&expected_prefix));
        prop_assert!(line.ends_with(&expected_suffix));
    }
}

// Byte output always decodes, whatever the payload
proptest! {
    #[test]
    fn test_bytes_output_into_text(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let text = AbilityOutput::Bytes(bytes.clone()).into_text();
        if let Ok(valid) = String::from_utf8(bytes) {
            prop_assert_eq!(text, valid);
        }
    }

    #[test]
    fn test_string_params_roundtrip(key in "[a-z]{1,10}", value in "\\PC*") {
        let args = AbilityArgs::new("task").with_param(key.clone(), serde_json::Value::String(value.clone()));
        prop_assert_eq!(args.param_str(&key).unwrap(), value);
    }
}
