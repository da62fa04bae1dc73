//! OpenAPI generation through the public API.

use serde_json::json;

use vaultframe::field::{FieldKind, FieldSchema};
use vaultframe::openapi::{document_paths, expand_pattern, DocumentOptions, OasDocument};
use vaultframe::path::{generic_name_regex, operation_fn, OperationHandler, Path, ResponseDoc};
use vaultframe::{BackendType, Operation, Response};

fn noop() -> vaultframe::path::OperationFunc {
    operation_fn(|_, _, _| async { Ok(None::<Response>) })
}

fn paths() -> Vec<Path> {
    vec![
        Path::new(format!("users/{}", generic_name_regex("name")))
            .with_field("name", FieldSchema::new(FieldKind::String).with_description("User name"))
            .with_field("ttl", FieldSchema::new(FieldKind::DurationSecond).with_default(json!("1h")))
            .with_field("tags", FieldSchema::new(FieldKind::CommaStringSlice))
            .with_operation(Operation::Update, OperationHandler::new(noop()))
            .with_operation(
                Operation::Read,
                OperationHandler::new(noop()).with_response(
                    200,
                    ResponseDoc::new("OK").with_field("ttl", FieldSchema::new(FieldKind::DurationSecond)),
                ),
            )
            .with_operation(Operation::Delete, OperationHandler::new(noop()))
            .with_help("Manage users", ""),
        Path::new("users/?").with_operation(Operation::List, OperationHandler::new(noop())),
        Path::new("(leases/)?renew(/(?P<url_lease_id>.+))?")
            .with_field("url_lease_id", FieldSchema::new(FieldKind::String))
            .with_operation(Operation::Update, OperationHandler::new(noop())),
    ]
}

fn document() -> OasDocument {
    let options = DocumentOptions {
        request_response_prefix: "users".into(),
        backend_type: BackendType::Credential,
        ..DocumentOptions::default()
    };
    let mut doc = OasDocument::new("v1.15.0");
    document_paths(&paths(), &options, &mut doc).unwrap();
    doc.create_operation_ids("");
    doc
}

#[test]
fn test_emit_reload_is_byte_equal() {
    let doc = document();
    let first = serde_json::to_string(&doc.to_value()).unwrap();

    let reloaded = OasDocument::from_value(serde_json::from_str(&first).unwrap()).unwrap();
    let second = serde_json::to_string(&reloaded.to_value()).unwrap();

    assert_eq!(first, second);
    assert_eq!(reloaded, doc);

    let read = reloaded.paths["/users/{name}"].get.as_ref().unwrap();
    assert!(read.responses.contains_key(&200));
}

#[test]
fn test_document_shape() {
    let value = document().to_value();

    assert_eq!(value["openapi"], "3.0.2");
    assert_eq!(value["info"]["version"], "v1.15.0");

    let user = &value["paths"]["/users/{name}"];
    assert_eq!(user["description"], "Manage users");
    assert_eq!(user["post"]["tags"], json!(["auth"]));
    assert_eq!(user["get"]["operationId"], "getUsersName");
    assert_eq!(user["delete"]["operationId"], "deleteUsersName");

    let names: Vec<&str> = user["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["name", "users_mount_path"]);

    let list = &value["paths"]["/users"]["get"];
    assert_eq!(list["parameters"][0]["name"], "list");
    assert_eq!(
        value["components"]["schemas"]["StandardListResponse"]["properties"]["keys"]["type"],
        "array"
    );

    for path in ["/leases/renew", "/leases/renew/{url_lease_id}", "/renew", "/renew/{url_lease_id}"] {
        assert!(value["paths"][path]["post"].is_object(), "{path}");
    }
}

#[test]
fn test_renew_pattern_expansion() {
    let (mut expanded, captures) = expand_pattern("(leases/)?renew(/(?P<url_lease_id>.+))?").unwrap();
    expanded.sort();
    assert_eq!(
        expanded,
        ["leases/renew", "leases/renew/{url_lease_id}", "renew", "renew/{url_lease_id}"]
    );
    assert!(captures.contains("url_lease_id"));
}

#[test]
fn test_operation_ids_unique_across_document() {
    let mut doc = OasDocument::new("");
    for path in ["Foo/{id}", "foo/{id}"] {
        let p = Path::new(path.replace("{id}", "(?P<id>.+)"))
            .with_field("id", FieldSchema::new(FieldKind::String))
            .with_operation(Operation::Read, OperationHandler::new(noop()));
        document_paths(&[p], &DocumentOptions::default(), &mut doc).unwrap();
    }
    doc.create_operation_ids("secrets");

    let ids: Vec<String> = doc
        .paths
        .values()
        .filter_map(|item| item.get.as_ref().map(|op| op.operation_id.clone()))
        .collect();
    assert_eq!(ids, ["getFooId_secrets", "getFooId_2_secrets"]);
}
