use hestia::error::HestiaError;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(HestiaError::config("x"), HestiaError::Config { .. }));
    assert!(matches!(HestiaError::modbus("x"), HestiaError::Modbus { .. }));
    assert!(matches!(HestiaError::mqtt("x"), HestiaError::Mqtt { .. }));
    assert!(matches!(HestiaError::snmp("x"), HestiaError::Snmp { .. }));
}

#[test]
fn error_constructors_group_2() {
    let ser = HestiaError::Serialization {
        message: "s".into(),
    };
    assert!(matches!(ser, HestiaError::Serialization { .. }));
    assert!(matches!(HestiaError::io("x"), HestiaError::Io { .. }));
    assert!(matches!(
        HestiaError::network("x"),
        HestiaError::Network { .. }
    ));
    assert!(matches!(
        HestiaError::not_found(99),
        HestiaError::NotFound { .. }
    ));
}

#[test]
fn error_constructors_group_3() {
    assert!(matches!(
        HestiaError::validation("f", "m"),
        HestiaError::Validation { .. }
    ));
    assert!(matches!(
        HestiaError::timeout("x"),
        HestiaError::Timeout { .. }
    ));
    assert!(matches!(
        HestiaError::permanent("x"),
        HestiaError::Permanent { .. }
    ));
    assert!(matches!(
        HestiaError::generic("x"),
        HestiaError::Generic { .. }
    ));
}

#[test]
fn display_messages() {
    let e = HestiaError::validation("field", "bad");
    assert!(format!("{}", e).contains("Validation error"));
    assert_eq!(HestiaError::not_found(99).to_string(), "value not found: 99");
    assert_eq!(
        HestiaError::unsupported_platform("gpio").to_string(),
        "gpio: unsupported platform"
    );
}

#[test]
fn classification() {
    assert!(HestiaError::MissingSource.is_setup());
    assert!(HestiaError::config("x").is_setup());
    assert!(!HestiaError::timeout("x").is_setup());

    assert!(HestiaError::permanent("script").is_permanent());
    assert!(!HestiaError::permanent("script").is_retryable());
    assert!(HestiaError::timeout("x").is_retryable());
}
