//! # service 模块说明
//!
//! ## 核心意图（Why）
//! - 以操作为粒度推导整份契约：每个操作得到一个请求消息与按状态码区分的响应消息，
//!   全部操作共享同一个 [`SchemaDeriver`]，相同类型只生成一次；
//! - 操作表以 `service MainService` 中每个 rpc 上方的 `//@Rpc{json}` 注解保存，IDL 文本往返后仍可重建。
//!
//! ## 规则（What）
//! - 请求：无参数使用 `google.protobuf.Empty`；唯一参数且推导为消息时直接使用该消息；
//!   其余情况合成 `{OperationId}RequestWrap`（`//@WrapArguments`），每个参数一个字段；
//! - 响应：消息类型直接使用，无响应体使用 `google.protobuf.Empty`，其余包装为
//!   `{OperationId}ResponseWrap{status}`（`//@WrapProperty`）；
//! - 文件上传/下载操作记录 `warn!` 后跳过，其他推导错误使整份契约失败。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProtoError, Result};
use crate::schema::{
    ANNOTATION_RPC, ANNOTATION_WRAP_ARGUMENTS, Proto, RpcDef, ServiceDef, is_identifier,
};

use super::derive::SchemaDeriver;
use super::{Contract, Operation, SchemaNode};

/// 契约服务名。
pub const MAIN_SERVICE: &str = "MainService";

const OK_STATUS: &str = "200";

/// rpc 注解中记录的操作签名。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSignature {
    pub arg_type_name: String,
    #[serde(default)]
    pub responses: BTreeMap<String, ResponseSignature>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSignature {
    pub type_name: String,
}

impl RpcSignature {
    /// 渲染为 `@Rpc{json}` 注解。
    pub fn to_annotation(&self) -> Result<String> {
        let json = serde_json::to_string(self).map_err(|err| ProtoError::InvalidSchema {
            context: self.arg_type_name.clone(),
            detail: format!("cannot render rpc annotation: {err}"),
        })?;
        Ok(format!("{ANNOTATION_RPC}{json}"))
    }

    /// 从 rpc 注解列表中提取签名；没有 `@Rpc` 注解时返回 `None`。
    pub fn from_annotations(rpc: &str, annotations: &[String]) -> Result<Option<Self>> {
        let Some(json) = annotations
            .iter()
            .find_map(|annotation| annotation.strip_prefix(ANNOTATION_RPC))
        else {
            return Ok(None);
        };
        serde_json::from_str(json)
            .map(Some)
            .map_err(|err| ProtoError::InvalidSchema {
                context: rpc.to_owned(),
                detail: format!("malformed rpc annotation: {err}"),
            })
    }

    /// 成功响应的类型名；缺少 `200` 时取第一个状态码。
    pub fn ok_type_name(&self) -> Option<&str> {
        self.responses
            .get(OK_STATUS)
            .or_else(|| self.responses.values().next())
            .map(|response| response.type_name.as_str())
    }
}

/// 操作级契约推导器。
pub struct ContractDeriver;

impl ContractDeriver {
    /// 推导整份契约，输出带服务块的 [`Proto`]。
    pub fn derive(contract: &Contract) -> Result<Proto> {
        let mut deriver = SchemaDeriver::new(&contract.components);
        let package = contract.package.as_deref().unwrap_or_default();

        // 组件表中的非空对象先行登记，保持与组件名顺序一致的定义顺序。
        for (name, node) in contract.components.iter() {
            if let SchemaNode::Object(object) = node
                && !object.properties.is_empty()
            {
                deriver.message_type(&SchemaNode::reference(name), "components", name)?;
            }
        }

        let mut rpcs = Vec::with_capacity(contract.operations.len());
        for operation in &contract.operations {
            if let Some(reason) = unsupported_reason(operation) {
                warn!(
                    package,
                    operation = operation.operation_id.as_str(),
                    reason,
                    "operation is not supported by protobuf, skipped"
                );
                continue;
            }
            rpcs.push(Self::derive_operation(&mut deriver, operation)?);
        }

        let mut proto = deriver.finish(contract.package.as_deref())?;
        if !rpcs.is_empty() {
            proto.services.push(ServiceDef {
                name: MAIN_SERVICE.to_owned(),
                rpcs,
            });
        }
        debug!(
            package,
            operations = proto.services.first().map_or(0, |service| service.rpcs.len()),
            "derived protobuf contract"
        );
        Ok(proto)
    }

    fn derive_operation(deriver: &mut SchemaDeriver<'_>, operation: &Operation) -> Result<RpcDef> {
        let operation_id = operation.operation_id.as_str();
        if !is_identifier(operation_id) {
            return Err(ProtoError::InvalidSchema {
                context: operation_id.to_owned(),
                detail: "operation id is not a valid protobuf identifier".to_owned(),
            });
        }
        let prefix = capitalize(operation_id);

        let arg_type_name = match operation.parameters.as_slice() {
            [] => deriver.use_empty(),
            [single] => match deriver.message_type(&single.schema, &prefix, &single.name)? {
                Some(message) => message,
                None => Self::wrap_arguments(deriver, &prefix, operation)?,
            },
            _ => Self::wrap_arguments(deriver, &prefix, operation)?,
        };

        let mut responses = BTreeMap::new();
        for response in &operation.responses {
            let type_name = match &response.schema {
                None => deriver.use_empty(),
                Some(schema) => match deriver.message_type(schema, &prefix, "response")? {
                    Some(message) => message,
                    None => {
                        let wrap_name = format!("{prefix}ResponseWrap{}", response.status);
                        deriver.add_wrapper(&wrap_name, schema.clone())?;
                        wrap_name
                    }
                },
            };
            responses.insert(response.status.clone(), ResponseSignature { type_name });
        }
        if responses.is_empty() {
            responses.insert(
                OK_STATUS.to_owned(),
                ResponseSignature {
                    type_name: deriver.use_empty(),
                },
            );
        }

        let signature = RpcSignature {
            arg_type_name,
            responses,
        };
        let ret = signature
            .ok_type_name()
            .map(str::to_owned)
            .unwrap_or_else(|| deriver.use_empty());
        Ok(RpcDef {
            name: operation_id.to_owned(),
            annotations: vec![signature.to_annotation()?],
            arg: signature.arg_type_name.clone(),
            ret,
        })
    }

    fn wrap_arguments(
        deriver: &mut SchemaDeriver<'_>,
        prefix: &str,
        operation: &Operation,
    ) -> Result<String> {
        let name = format!("{prefix}RequestWrap");
        let properties = operation
            .parameters
            .iter()
            .map(|parameter| (parameter.name.clone(), parameter.schema.clone()))
            .collect();
        deriver.add_message(&name, properties, vec![ANNOTATION_WRAP_ARGUMENTS.to_owned()])?;
        Ok(name)
    }
}

fn unsupported_reason(operation: &Operation) -> Option<&'static str> {
    if operation.consumes_multipart
        || operation
            .parameters
            .iter()
            .any(|parameter| parameter.schema.is_file_like())
    {
        return Some("file upload not supported");
    }
    if operation
        .responses
        .iter()
        .filter_map(|response| response.schema.as_ref())
        .any(SchemaNode::is_file_like)
    {
        return Some("file download not supported");
    }
    None
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Components, ObjectSchema, ScalarKind};
    use crate::schema::{EMPTY_TYPE, FieldType};

    fn contract() -> Contract {
        let user = SchemaNode::object(
            ObjectSchema::anonymous()
                .property("name", SchemaNode::string())
                .property("age", SchemaNode::int32()),
        );
        Contract::new("demo-app")
            .components(Components::new().with("User", user))
            .operation(
                Operation::new("getUser")
                    .parameter("id", SchemaNode::int64())
                    .response("200", Some(SchemaNode::reference("User"))),
            )
            .operation(
                Operation::new("saveUser")
                    .parameter("user", SchemaNode::reference("User"))
                    .response("200", Some(SchemaNode::boolean())),
            )
            .operation(Operation::new("ping").response("200", None))
            .operation(
                Operation::new("upload")
                    .parameter("file", SchemaNode::scalar(ScalarKind::File))
                    .response("200", None),
            )
    }

    #[test]
    fn derives_request_and_response_messages() {
        let proto = ContractDeriver::derive(&contract()).expect("推导契约");
        assert_eq!(proto.package.as_deref(), Some("demo_app"));

        let wrap = proto.message("GetUserRequestWrap").expect("参数包装");
        assert!(wrap.has_annotation(ANNOTATION_WRAP_ARGUMENTS));
        assert_eq!(wrap.fields[0].ty, FieldType::Scalar(crate::schema::ScalarType::Int64));

        let response = proto.message("SaveUserResponseWrap200").expect("响应包装");
        assert!(response.is_wrap_property());

        let service = proto.service(MAIN_SERVICE).expect("服务存在");
        let names: Vec<_> = service.rpcs.iter().map(|rpc| rpc.name.as_str()).collect();
        assert_eq!(names, ["getUser", "saveUser", "ping"]);
        assert_eq!(service.rpcs[1].arg, "User");
        assert_eq!(service.rpcs[2].arg, EMPTY_TYPE);
        assert_eq!(service.rpcs[2].ret, EMPTY_TYPE);
    }

    #[test]
    fn rpc_signature_survives_idl_round_trip() {
        let proto = ContractDeriver::derive(&contract()).expect("推导契约");
        let reparsed = Proto::parse(&proto.to_idl()).expect("解析 IDL");
        assert_eq!(reparsed, proto);

        let rpc = &reparsed.service(MAIN_SERVICE).expect("服务存在").rpcs[0];
        let signature = RpcSignature::from_annotations(&rpc.name, &rpc.annotations)
            .expect("解析注解")
            .expect("存在注解");
        assert_eq!(signature.arg_type_name, "GetUserRequestWrap");
        assert_eq!(signature.ok_type_name(), Some("User"));
    }

    #[test]
    fn derivation_is_deterministic() {
        let first = ContractDeriver::derive(&contract()).expect("推导契约").to_idl();
        let second = ContractDeriver::derive(&contract()).expect("推导契约").to_idl();
        assert_eq!(first, second);
    }
}
