use proptest::prelude::*;
use uml_tool::ErrorKind;
use uml_tool::pipeline::validate_upload_filename;

proptest! {
    #[test]
    fn xmi_names_are_accepted(stem in "[A-Za-z0-9 _.-]{0,40}", ext in "(?i:xmi)") {
        let name = format!("{stem}.{ext}");
        prop_assert_eq!(validate_upload_filename(Some(name.as_str())).unwrap(), name.as_str());
    }

    #[test]
    fn other_extensions_are_rejected(stem in "[A-Za-z0-9_-]{1,40}", ext in "[a-z]{1,5}") {
        prop_assume!(ext != "xmi");
        let name = format!("{stem}.{ext}");
        let err = validate_upload_filename(Some(name.as_str())).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::InvalidInputFormat);
    }

    #[test]
    fn every_kind_has_fixed_response(kind in prop_oneof![
        Just(ErrorKind::InvalidInputFormat),
        Just(ErrorKind::IngestFailure),
        Just(ErrorKind::IncompatibleInput),
        Just(ErrorKind::GenerationFailure),
        Just(ErrorKind::PackagingFailure),
        Just(ErrorKind::MaterializationFailure),
    ]) {
        prop_assert!(!kind.detail().is_empty());
        prop_assert_eq!(kind.is_client_error(), kind.status_code().as_u16() == 400);
    }
}
