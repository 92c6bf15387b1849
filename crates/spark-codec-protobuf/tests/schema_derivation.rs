//! 契约推导与 IDL 文本集成测试
//!
//! # 教案级注释概览
//!
//! - **测试目标 (Why)**：推导结果会被多个节点独立加载并比对，因此要求同一契约重复推导得到逐字节相同的 IDL，
//!   标签严格从 1 递增，嵌套容器按固定规则命名；任何推导失败都必须以稳定错误码报告。
//! - **结构安排 (How)**：
//!   - `derivation_*`：单根推导的命名、包装与确定性；
//!   - `contract_*`：整份契约推导出的服务块与 rpc 注解；
//!   - `idl_*`：打印与解析互为逆运算；
//!   - `rejects_*`：错误路径与错误码。
//! - **前置条件 (What)**：只依赖公开 API，不触碰编解码热路径。

use spark_codec_protobuf::contract::derive::enum_name;
use spark_codec_protobuf::contract::service::{MAIN_SERVICE, RpcSignature};
use spark_codec_protobuf::schema::{FieldType, ScalarType as Scalar};
use spark_codec_protobuf::{
    Components, Contract, ContractDeriver, ErrorStage, ObjectSchema, Operation, Proto, ProtoError,
    ScalarKind, SchemaDeriver, SchemaNode,
};

fn shop_components() -> Components {
    Components::new()
        .with(
            "User",
            SchemaNode::object(
                ObjectSchema::anonymous()
                    .property("name", SchemaNode::string())
                    .property("age", SchemaNode::int32())
                    .property("friends", SchemaNode::array(SchemaNode::reference("User"))),
            ),
        )
        .with(
            "Order",
            SchemaNode::object(
                ObjectSchema::anonymous()
                    .property("id", SchemaNode::string())
                    .property("buyer", SchemaNode::reference("User"))
                    .property(
                        "state",
                        SchemaNode::enumeration(["CREATED", "PAID", "SHIPPED"]),
                    )
                    .property("lines", SchemaNode::array(SchemaNode::array(SchemaNode::string())))
                    .property("labels", SchemaNode::map(SchemaNode::int64()))
                    .property("payload", SchemaNode::object(ObjectSchema::anonymous())),
            ),
        )
}

fn shop_contract() -> Contract {
    Contract::new("demo-shop")
        .components(shop_components())
        .operation(
            Operation::new("getUser")
                .parameter("id", SchemaNode::int64())
                .response("200", Some(SchemaNode::reference("User")))
                .response("404", Some(SchemaNode::string())),
        )
        .operation(
            Operation::new("placeOrder")
                .parameter("order", SchemaNode::reference("Order"))
                .response("200", None),
        )
        .operation(
            Operation::new("listTags").response("200", Some(SchemaNode::array(SchemaNode::string()))),
        )
}

#[test]
fn derivation_is_byte_for_byte_deterministic() {
    let components = shop_components();
    let root = SchemaNode::reference("Order");
    let first = SchemaDeriver::derive(Some("demo"), &components, &root, "input").expect("首次推导");
    let second = SchemaDeriver::derive(Some("demo"), &components, &root, "input").expect("再次推导");
    assert_eq!(first.to_idl(), second.to_idl());

    let contract = shop_contract();
    let left = ContractDeriver::derive(&contract).expect("契约推导");
    let right = ContractDeriver::derive(&contract).expect("契约再次推导");
    assert_eq!(left.to_idl(), right.to_idl());
}

#[test]
fn derivation_numbers_fields_in_declaration_order() {
    let proto = ContractDeriver::derive(&shop_contract()).expect("契约推导");
    for message in proto.messages() {
        let tags: Vec<u32> = message.fields.iter().map(|field| field.tag).collect();
        let expected: Vec<u32> = (1..=message.fields.len() as u32).collect();
        assert_eq!(tags, expected, "消息 {} 的标签应从 1 连续递增", message.name);
    }
    let order = proto.message("Order").expect("Order 存在");
    let names: Vec<&str> = order.fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, ["id", "buyer", "state", "lines", "labels", "payload"]);
}

#[test]
fn derivation_wraps_nested_containers() {
    let proto = ContractDeriver::derive(&shop_contract()).expect("契约推导");
    let order = proto.message("Order").expect("Order 存在");

    let lines = order.field("lines").expect("lines 字段");
    assert!(lines.repeated);
    assert_eq!(lines.ty, FieldType::Message("ListString".into()));

    let wrapper = proto.message("ListString").expect("包装消息存在");
    assert!(wrapper.is_wrap_property());
    assert_eq!(wrapper.fields.len(), 1);
    assert_eq!(wrapper.fields[0].name, "value");
    assert!(wrapper.fields[0].repeated);
    assert_eq!(wrapper.fields[0].ty, FieldType::Scalar(Scalar::String));

    let labels = order.field("labels").expect("labels 字段");
    assert_eq!(
        labels.ty,
        FieldType::Map {
            key: Scalar::String,
            value: Box::new(FieldType::Scalar(Scalar::Int64)),
        }
    );
    assert_eq!(order.field("payload").expect("payload 字段").ty, FieldType::Any);
}

#[test]
fn derivation_shares_identical_wrappers() {
    let root = SchemaNode::object(
        ObjectSchema::named("Grid")
            .property("rows", SchemaNode::array(SchemaNode::array(SchemaNode::string())))
            .property("cols", SchemaNode::array(SchemaNode::array(SchemaNode::string()))),
    );
    let components = Components::new();
    let derived = SchemaDeriver::derive(None, &components, &root, "input").expect("推导");
    let wrappers: Vec<&str> = derived
        .proto
        .messages()
        .filter(|message| message.is_wrap_property())
        .map(|message| message.name.as_str())
        .collect();
    assert_eq!(wrappers, ["ListString"]);
    let grid = derived.proto.message("Grid").expect("Grid 存在");
    assert_eq!(grid.fields[0].ty, grid.fields[1].ty);
}

#[test]
fn derivation_reuses_anonymous_leaf_inside_nested_containers() {
    let root = SchemaNode::object(ObjectSchema::named("Root").property(
        "grid",
        SchemaNode::array(SchemaNode::array(SchemaNode::object(
            ObjectSchema::anonymous().property("x", SchemaNode::string()),
        ))),
    ));
    let components = Components::new();
    let derived = SchemaDeriver::derive(None, &components, &root, "input").expect("推导");
    let names: Vec<&str> = derived
        .proto
        .messages()
        .map(|message| message.name.as_str())
        .collect();
    assert_eq!(names, ["Root", "RootGrid", "ListRootGrid"]);

    let wrapper = derived.proto.message("ListRootGrid").expect("包装消息存在");
    assert_eq!(wrapper.fields[0].ty, FieldType::Message("RootGrid".into()));
    assert!(wrapper.fields[0].repeated);
    let reparsed = Proto::parse(&derived.to_idl()).expect("解析打印结果");
    assert_eq!(reparsed, derived.proto);
}

#[test]
fn derivation_names_enums_by_content() {
    let proto = ContractDeriver::derive(&shop_contract()).expect("契约推导");
    let expected = enum_name(&["CREATED".into(), "PAID".into(), "SHIPPED".into()]);
    let state = proto
        .message("Order")
        .and_then(|order| order.field("state"))
        .expect("state 字段");
    assert_eq!(state.ty, FieldType::Enum(expected.clone()));
    let definition = proto.enum_def(&expected).expect("枚举定义存在");
    assert_eq!(definition.values, ["CREATED", "PAID", "SHIPPED"]);
}

#[test]
fn contract_records_operations_in_main_service() {
    let proto = ContractDeriver::derive(&shop_contract()).expect("契约推导");
    assert_eq!(proto.package.as_deref(), Some("demo_shop"));

    let service = proto.service(MAIN_SERVICE).expect("MainService 存在");
    let names: Vec<&str> = service.rpcs.iter().map(|rpc| rpc.name.as_str()).collect();
    assert_eq!(names, ["getUser", "placeOrder", "listTags"]);

    let get_user = &service.rpcs[0];
    let signature = RpcSignature::from_annotations(&get_user.name, &get_user.annotations)
        .expect("注解可解析")
        .expect("存在 @Rpc 注解");
    assert_eq!(signature.arg_type_name, "GetUserRequestWrap");
    assert_eq!(signature.ok_type_name(), Some("User"));
    assert_eq!(signature.responses["404"].type_name, "GetUserResponseWrap404");
    assert_eq!(get_user.ret, "User");

    let request = proto.message("GetUserRequestWrap").expect("请求包装存在");
    assert!(request.has_annotation("@WrapArguments"));
    assert!(!request.is_wrap_property());

    let place_order = &service.rpcs[1];
    assert_eq!(place_order.arg, "Order");
    assert_eq!(place_order.ret, "google.protobuf.Empty");

    let list_tags = &service.rpcs[2];
    assert_eq!(list_tags.arg, "google.protobuf.Empty");
    assert_eq!(list_tags.ret, "ListTagsResponseWrap200");
    assert!(proto.imports.iter().any(|import| import == "google/protobuf/empty.proto"));
    assert!(proto.imports.iter().any(|import| import == "google/protobuf/any.proto"));
}

#[test]
fn idl_print_then_parse_reproduces_schema() {
    let proto = ContractDeriver::derive(&shop_contract()).expect("契约推导");
    let text = proto.to_idl();
    let reparsed = Proto::parse(&text).expect("解析打印结果");
    assert_eq!(reparsed, proto);
    assert_eq!(reparsed.to_idl(), text);
}

#[test]
fn idl_keeps_wrapped_root_layout() {
    let components = Components::new();
    let root = SchemaNode::array(SchemaNode::formatted(ScalarKind::Integer, "int32"));
    let derived = SchemaDeriver::derive(None, &components, &root, "input").expect("推导");
    assert!(derived.wrapped);
    assert_eq!(
        derived.to_idl(),
        "syntax = \"proto3\";\n\n//@WrapProperty\nmessage input {\n  repeated int32 value = 1;\n}\n\n"
    );
}

#[test]
fn rejects_invalid_enum_member() {
    let root = SchemaNode::object(
        ObjectSchema::named("Flag").property("mode", SchemaNode::enumeration(["on", "not valid"])),
    );
    let components = Components::new();
    let err = SchemaDeriver::derive(None, &components, &root, "input").unwrap_err();
    assert!(matches!(
        &err,
        ProtoError::InvalidEnumValue { value, .. } if value == "not valid"
    ));
    assert_eq!(err.code(), "protobuf.derive.invalid_enum");
    assert_eq!(err.stage(), ErrorStage::Derivation);

    for bad in ["v1.2", "dash-ed"] {
        let root = SchemaNode::object(
            ObjectSchema::named("Flag").property("mode", SchemaNode::enumeration(["ok", bad])),
        );
        let err = SchemaDeriver::derive(None, &components, &root, "input").unwrap_err();
        assert!(matches!(&err, ProtoError::InvalidEnumValue { value, .. } if value == bad));
    }
}

#[test]
fn rejects_duplicate_enum_member() {
    let root = SchemaNode::object(
        ObjectSchema::named("Flag").property("mode", SchemaNode::enumeration(["A", "B", "A"])),
    );
    let components = Components::new();
    let err = SchemaDeriver::derive(None, &components, &root, "input").unwrap_err();
    assert!(matches!(&err, ProtoError::InvalidEnumValue { value, .. } if value == "A"));
    assert_eq!(err.code(), "protobuf.derive.invalid_enum");
}

#[test]
fn rejects_unresolved_reference() {
    let root = SchemaNode::object(
        ObjectSchema::named("Holder").property("missing", SchemaNode::reference("Ghost")),
    );
    let components = Components::new();
    let err = SchemaDeriver::derive(None, &components, &root, "input").unwrap_err();
    assert!(matches!(
        &err,
        ProtoError::UnresolvedReference { reference, context }
            if reference.ends_with("Ghost") && context == "Holder.missing"
    ));
    assert_eq!(err.code(), "protobuf.derive.unresolved_ref");
}

#[test]
fn rejects_binary_payload_in_schema() {
    let root = SchemaNode::object(
        ObjectSchema::named("Upload")
            .property("file", SchemaNode::formatted(ScalarKind::String, "binary")),
    );
    let components = Components::new();
    let err = SchemaDeriver::derive(None, &components, &root, "input").unwrap_err();
    assert_eq!(err.code(), "protobuf.derive.unsupported_scalar");
}

#[test]
fn contract_skips_file_operations() {
    let contract = Contract::new("files")
        .operation(
            Operation::new("upload")
                .parameter("file", SchemaNode::scalar(ScalarKind::File))
                .multipart()
                .response("200", None),
        )
        .operation(Operation::new("ping").response("200", Some(SchemaNode::string())));
    let proto = ContractDeriver::derive(&contract).expect("契约推导");
    let service = proto.service(MAIN_SERVICE).expect("MainService 存在");
    let names: Vec<&str> = service.rpcs.iter().map(|rpc| rpc.name.as_str()).collect();
    assert_eq!(names, ["ping"]);
}
