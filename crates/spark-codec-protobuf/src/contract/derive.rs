//! # derive 模块说明
//!
//! ## 核心意图（Why）
//! - 把契约类型树转换为线格式 Schema：对象成为消息，数组/映射成为重复/映射字段，枚举按内容寻址命名，
//!   线格式无法直接承载的嵌套容器与非对象根类型被包装为单字段 `value` 消息；
//! - 同一契约重复推导必须得到逐字节相同的 IDL，标签严格按属性声明顺序从 1 递增。
//!
//! ## 算法（How）
//! - **延迟工作队列**：遇到消息、包装消息或枚举时只登记名称并把构建任务推入 FIFO 队列，
//!   当前字段立即以名称引用它；`finish` 反复出队直到队列为空，处理过程中允许继续入队；
//! - **名称备忘**：名称在入队前即被登记，自引用与互相引用的对象图因此自然终止；
//!   同名但结构不同的对象返回 [`ProtoError::NameConflict`]，同名同结构则复用；
//! - **定义顺序**：消息与枚举按出队顺序输出，队列顺序只由属性遍历顺序决定，保证确定性。
//!
//! ## 命名规则（What）
//! - 枚举：`Enum_` + 值列表（按声明顺序渲染为 `[A, B, C]`）的小写十六进制 SHA-256；
//! - 嵌套容器包装：`List`/`Map` 前缀按嵌套路径拼接，末尾为叶子类型名首字母大写（`.` 替换为 `_`），如 `ListListString`；
//! - 匿名内联对象：`{Owner}{Property}`，两段均首字母大写。

use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ProtoError, Result};
use crate::schema::{
    ANNOTATION_WRAP_PROPERTY, ANY_IMPORT, Definition, EMPTY_IMPORT, EMPTY_TYPE, EnumDef, FieldDef,
    FieldType, MessageDef, Proto, ScalarType, WRAP_FIELD, is_identifier,
};

use super::{ObjectSchema, ScalarKind, SchemaNode, SchemaResolver};

/// 引用链最多跟随的跳数。
const MAX_REFERENCE_HOPS: usize = 64;
/// 容器嵌套的最大层数。
const MAX_CONTAINER_NESTING: usize = 32;

/// 单根推导结果。
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedSchema {
    pub proto: Proto,
    /// 根消息的短名称。
    pub root_message: String,
    /// 根消息是否为 `value` 单字段包装。
    pub wrapped: bool,
}

impl DerivedSchema {
    pub fn to_idl(&self) -> String {
        self.proto.to_idl()
    }
}

/// 包名中的 `-` 替换为 `_`。
pub fn escape_package_name(name: &str) -> String {
    name.replace('-', "_")
}

/// 消息名中的 `.` 替换为 `_`。
pub fn escape_message_name(name: &str) -> String {
    name.replace('.', "_")
}

/// 内容寻址的枚举名称。
pub fn enum_name(values: &[String]) -> String {
    let rendered = format!("[{}]", values.join(", "));
    format!("Enum_{}", hex::encode(Sha256::digest(rendered.as_bytes())))
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

enum Reserved {
    Message(ObjectSchema),
    Wrapper,
    Enum,
}

enum Task {
    Message {
        name: String,
        object: ObjectSchema,
        annotations: Vec<String>,
    },
    /// `owner`/`property` 是容器所在的原始位置，叶子匿名对象沿用同一名称。
    Wrapper {
        name: String,
        node: SchemaNode,
        owner: String,
        property: String,
    },
    Enum {
        name: String,
        values: Vec<String>,
        context: String,
    },
}

/// 契约 → 线格式 Schema 推导器。
///
/// # 教案式说明
/// - **意图 (Why)**：同一个推导器可以依次登记多个根（例如契约中的全部操作），最终输出一份共享去重的 [`Proto`]；
/// - **契约 (What)**：`add_*` 系列只登记名称并入队，真正的字段构建发生在 [`SchemaDeriver::finish`]，
///   因此延迟任务中的错误（如非法枚举值）也在 `finish` 返回；
/// - **风险 (Trade-offs)**：任务持有节点的克隆，换取对解析器生命周期的解耦。
pub struct SchemaDeriver<'r> {
    resolver: &'r dyn SchemaResolver,
    reserved: HashMap<String, Reserved>,
    queue: VecDeque<Task>,
    definitions: Vec<Definition>,
    imports: Vec<String>,
}

impl<'r> SchemaDeriver<'r> {
    pub fn new(resolver: &'r dyn SchemaResolver) -> Self {
        Self {
            resolver,
            reserved: HashMap::new(),
            queue: VecDeque::new(),
            definitions: Vec::new(),
            imports: Vec::new(),
        }
    }

    /// 推导单个根类型。
    ///
    /// 根为非空对象时直接作为根消息，否则包装为名为 `root_name` 的单字段消息。
    pub fn derive(
        package: Option<&str>,
        resolver: &'r dyn SchemaResolver,
        root: &SchemaNode,
        root_name: &str,
    ) -> Result<DerivedSchema> {
        let mut deriver = SchemaDeriver::new(resolver);
        let (root_message, wrapped) = deriver.add_root(root, root_name)?;
        let proto = deriver.finish(package)?;
        Ok(DerivedSchema {
            proto,
            root_message,
            wrapped,
        })
    }

    /// 登记根类型，返回根消息名称与是否包装。
    pub fn add_root(&mut self, root: &SchemaNode, root_name: &str) -> Result<(String, bool)> {
        let (reference, resolved) = self.resolve(root, root_name)?;
        if let SchemaNode::Object(object) = resolved
            && !object.properties.is_empty()
        {
            let name = message_name(object, reference, || root_name.to_owned());
            self.reserve_message(&name, object, Vec::new())?;
            return Ok((name, false));
        }
        self.add_wrapper(root_name, root.clone())?;
        Ok((root_name.to_owned(), true))
    }

    /// 登记一个带注解的合成消息，属性顺序即标签顺序。
    pub fn add_message(
        &mut self,
        name: &str,
        properties: Vec<(String, SchemaNode)>,
        annotations: Vec<String>,
    ) -> Result<()> {
        let object = ObjectSchema {
            name: Some(name.to_owned()),
            properties,
        };
        if self.reserved.contains_key(name) {
            return Err(ProtoError::NameConflict {
                name: name.to_owned(),
            });
        }
        self.reserve_message(name, &object, annotations)
    }

    /// 登记 `value` 单字段包装消息；名称已被占用时返回冲突。
    pub fn add_wrapper(&mut self, name: &str, node: SchemaNode) -> Result<()> {
        self.queue_wrapper(name, node, name, WRAP_FIELD)
    }

    fn queue_wrapper(
        &mut self,
        name: &str,
        node: SchemaNode,
        owner: &str,
        property: &str,
    ) -> Result<()> {
        check_identifier(name, name)?;
        if self.reserved.contains_key(name) {
            return Err(ProtoError::NameConflict {
                name: name.to_owned(),
            });
        }
        self.reserved.insert(name.to_owned(), Reserved::Wrapper);
        self.queue.push_back(Task::Wrapper {
            name: name.to_owned(),
            node,
            owner: owner.to_owned(),
            property: property.to_owned(),
        });
        Ok(())
    }

    /// 若节点推导为单个消息类型则返回其名称。
    pub fn message_type(
        &mut self,
        node: &SchemaNode,
        owner: &str,
        property: &str,
    ) -> Result<Option<String>> {
        match self.field_type(node, owner, property)? {
            (FieldType::Message(name), false) => Ok(Some(name)),
            _ => Ok(None),
        }
    }

    /// 引用 `google.protobuf.Empty` 并记录导入。
    pub fn use_empty(&mut self) -> String {
        self.add_import(EMPTY_IMPORT);
        EMPTY_TYPE.to_owned()
    }

    /// 排空工作队列并输出 [`Proto`]。
    pub fn finish(mut self, package: Option<&str>) -> Result<Proto> {
        while let Some(task) = self.queue.pop_front() {
            self.process(task)?;
        }
        let proto = Proto {
            package: package
                .filter(|package| !package.is_empty())
                .map(escape_package_name),
            imports: self.imports,
            definitions: self.definitions,
            ..Proto::default()
        };
        proto.validate()?;
        debug!(
            package = proto.package.as_deref().unwrap_or_default(),
            messages = proto.messages().count(),
            enums = proto.enums().count(),
            "derived protobuf schema from contract"
        );
        Ok(proto)
    }

    fn process(&mut self, task: Task) -> Result<()> {
        match task {
            Task::Message {
                name,
                object,
                annotations,
            } => {
                let mut message = MessageDef::new(name.clone());
                message.annotations = annotations;
                for (index, (property, node)) in object.properties.iter().enumerate() {
                    let context = format!("{name}.{property}");
                    check_identifier(property, &context)?;
                    if message.field(property).is_some() {
                        return Err(ProtoError::InvalidSchema {
                            context,
                            detail: "duplicate property".to_owned(),
                        });
                    }
                    let tag = u32::try_from(index + 1).map_err(|_| ProtoError::InvalidSchema {
                        context: context.clone(),
                        detail: "too many properties".to_owned(),
                    })?;
                    let (ty, repeated) = self.field_type(node, &name, property)?;
                    message.fields.push(FieldDef {
                        name: property.clone(),
                        tag,
                        repeated,
                        ty,
                    });
                }
                self.definitions.push(Definition::Message(message));
            }
            Task::Wrapper {
                name,
                node,
                owner,
                property,
            } => {
                let (ty, repeated) = self.field_type(&node, &owner, &property)?;
                let mut message = MessageDef::new(name);
                message.annotations.push(ANNOTATION_WRAP_PROPERTY.to_owned());
                message.fields.push(FieldDef {
                    name: WRAP_FIELD.to_owned(),
                    tag: 1,
                    repeated,
                    ty,
                });
                self.definitions.push(Definition::Message(message));
            }
            Task::Enum {
                name,
                values,
                context,
            } => {
                let invalid = values.iter().enumerate().find(|(index, value)| {
                    !is_identifier(value) || values[..*index].contains(value)
                });
                if let Some((_, value)) = invalid {
                    return Err(ProtoError::InvalidEnumValue {
                        context,
                        enum_name: name,
                        value: value.clone(),
                    });
                }
                self.definitions.push(Definition::Enum(EnumDef {
                    name,
                    annotations: Vec::new(),
                    values,
                }));
            }
        }
        Ok(())
    }

    /// 计算字段类型与重复标记。
    fn field_type<'n>(
        &mut self,
        node: &'n SchemaNode,
        owner: &str,
        property: &str,
    ) -> Result<(FieldType, bool)>
    where
        'r: 'n,
    {
        let context = format!("{owner}.{property}");
        let (reference, resolved) = self.resolve(node, &context)?;
        match resolved {
            SchemaNode::Scalar { kind, format } => Ok((
                FieldType::Scalar(scalar_type(*kind, format.as_deref(), &context)?),
                false,
            )),
            SchemaNode::Enum(values) if values.is_empty() => {
                Ok((FieldType::Scalar(ScalarType::String), false))
            }
            SchemaNode::Enum(values) => {
                let name = self.reserve_enum(values, context)?;
                Ok((FieldType::Enum(name), false))
            }
            SchemaNode::Object(object) if object.properties.is_empty() => {
                self.add_import(ANY_IMPORT);
                Ok((FieldType::Any, false))
            }
            SchemaNode::Object(object) => {
                let name = message_name(object, reference, || {
                    format!("{}{}", capitalize(owner), capitalize(property))
                });
                self.reserve_message(&name, object, Vec::new())?;
                Ok((FieldType::Message(name), false))
            }
            SchemaNode::Array(item) => Ok((self.element_type(item, owner, property)?, true)),
            SchemaNode::Map(value) => Ok((
                FieldType::Map {
                    key: ScalarType::String,
                    value: Box::new(self.element_type(value, owner, property)?),
                },
                false,
            )),
            SchemaNode::Reference(reference) => Err(ProtoError::UnresolvedReference {
                reference: reference.clone(),
                context,
            }),
        }
    }

    /// 容器元素类型；元素本身仍是容器时改为引用包装消息。
    fn element_type<'n>(
        &mut self,
        item: &'n SchemaNode,
        owner: &str,
        property: &str,
    ) -> Result<FieldType>
    where
        'r: 'n,
    {
        let context = format!("{owner}.{property}");
        let (_, resolved) = self.resolve(item, &context)?;
        if matches!(resolved, SchemaNode::Array(_) | SchemaNode::Map(_)) {
            let name = self.wrapper_name(item, owner, property)?;
            match self.reserved.get(&name) {
                Some(Reserved::Wrapper) => {}
                Some(_) => return Err(ProtoError::NameConflict { name }),
                None => self.queue_wrapper(&name, resolved.clone(), owner, property)?,
            }
            return Ok(FieldType::Message(name));
        }
        Ok(self.field_type(item, owner, property)?.0)
    }

    fn wrapper_name<'n>(
        &mut self,
        container: &'n SchemaNode,
        owner: &str,
        property: &str,
    ) -> Result<String>
    where
        'r: 'n,
    {
        let context = format!("{owner}.{property}");
        let mut name = String::new();
        let mut current = container;
        for _ in 0..MAX_CONTAINER_NESTING {
            let (_, resolved) = self.resolve(current, &context)?;
            match resolved {
                SchemaNode::Array(inner) => {
                    name.push_str("List");
                    current = inner.as_ref();
                }
                SchemaNode::Map(inner) => {
                    name.push_str("Map");
                    current = inner.as_ref();
                }
                _ => {
                    let (leaf, _) = self.field_type(current, owner, property)?;
                    name.push_str(&capitalize(&escape_message_name(&leaf.type_name())));
                    return Ok(name);
                }
            }
        }
        Err(ProtoError::InvalidSchema {
            context,
            detail: format!("containers nested deeper than {MAX_CONTAINER_NESTING} levels"),
        })
    }

    /// 跟随引用链，返回最后一个组件名与目标节点。
    fn resolve<'n>(
        &self,
        node: &'n SchemaNode,
        context: &str,
    ) -> Result<(Option<&'n str>, &'n SchemaNode)>
    where
        'r: 'n,
    {
        let resolver: &'r dyn SchemaResolver = self.resolver;
        let mut current = node;
        let mut name = None;
        for _ in 0..MAX_REFERENCE_HOPS {
            let SchemaNode::Reference(reference) = current else {
                return Ok((name, current));
            };
            let (target_name, target) =
                resolver
                    .resolve(reference)
                    .ok_or_else(|| ProtoError::UnresolvedReference {
                        reference: reference.clone(),
                        context: context.to_owned(),
                    })?;
            name = Some(target_name);
            current = target;
        }
        Err(ProtoError::InvalidSchema {
            context: context.to_owned(),
            detail: format!("reference chain longer than {MAX_REFERENCE_HOPS} hops"),
        })
    }

    fn reserve_message(
        &mut self,
        name: &str,
        object: &ObjectSchema,
        annotations: Vec<String>,
    ) -> Result<()> {
        check_identifier(name, name)?;
        match self.reserved.get(name) {
            Some(Reserved::Message(existing)) if existing == object => Ok(()),
            Some(_) => Err(ProtoError::NameConflict {
                name: name.to_owned(),
            }),
            None => {
                self.reserved
                    .insert(name.to_owned(), Reserved::Message(object.clone()));
                self.queue.push_back(Task::Message {
                    name: name.to_owned(),
                    object: object.clone(),
                    annotations,
                });
                Ok(())
            }
        }
    }

    fn reserve_enum(&mut self, values: &[String], context: String) -> Result<String> {
        let name = enum_name(values);
        match self.reserved.get(&name) {
            Some(Reserved::Enum) => {}
            Some(_) => return Err(ProtoError::NameConflict { name }),
            None => {
                self.reserved.insert(name.clone(), Reserved::Enum);
                self.queue.push_back(Task::Enum {
                    name: name.clone(),
                    values: values.to_vec(),
                    context,
                });
            }
        }
        Ok(name)
    }

    fn add_import(&mut self, import: &str) {
        if !self.imports.iter().any(|existing| existing == import) {
            self.imports.push(import.to_owned());
        }
    }
}

fn message_name(
    object: &ObjectSchema,
    reference: Option<&str>,
    fallback: impl FnOnce() -> String,
) -> String {
    let name = object
        .name
        .as_deref()
        .or(reference)
        .map_or_else(fallback, str::to_owned);
    escape_message_name(&name)
}

fn check_identifier(name: &str, context: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ProtoError::InvalidSchema {
            context: context.to_owned(),
            detail: format!("`{name}` is not a valid protobuf identifier"),
        })
    }
}

/// `(kind, format)` → 线格式标量。
pub fn scalar_type(kind: ScalarKind, format: Option<&str>, context: &str) -> Result<ScalarType> {
    let unsupported = |detail: &str| ProtoError::UnsupportedScalar {
        context: context.to_owned(),
        kind: kind.name().to_owned(),
        format: format.unwrap_or("null").to_owned(),
        detail: detail.to_owned(),
    };
    match (kind, format) {
        (ScalarKind::Boolean, _) => Ok(ScalarType::Bool),
        (ScalarKind::Integer, None | Some("int64")) => Ok(ScalarType::Int64),
        (ScalarKind::Integer, Some("int8" | "int16" | "int32")) => Ok(ScalarType::Int32),
        (ScalarKind::Integer, Some(_)) => Err(unsupported("unknown integer format")),
        (ScalarKind::Number, None | Some("double")) => Ok(ScalarType::Double),
        (ScalarKind::Number, Some("float")) => Ok(ScalarType::Float),
        (ScalarKind::Number, Some(_)) => Err(unsupported("unknown number format")),
        (ScalarKind::String, Some("byte")) => Ok(ScalarType::Bytes),
        (ScalarKind::String, Some("date" | "date-time")) => Ok(ScalarType::Int64),
        (ScalarKind::String, Some("binary")) | (ScalarKind::File, _) => {
            Err(unsupported("file upload/download is not supported"))
        }
        (ScalarKind::String, _) => Ok(ScalarType::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Components;

    fn user_components() -> Components {
        Components::new().with(
            "User",
            SchemaNode::object(
                ObjectSchema::anonymous()
                    .property("name", SchemaNode::string())
                    .property("parent", SchemaNode::reference("User")),
            ),
        )
    }

    #[test]
    fn string_root_is_wrapped() {
        let components = Components::new();
        let derived =
            SchemaDeriver::derive(Some("test.string"), &components, &SchemaNode::string(), "input")
                .expect("推导");
        assert!(derived.wrapped);
        assert_eq!(
            derived.to_idl(),
            "syntax = \"proto3\";\npackage test.string;\n\n//@WrapProperty\nmessage input {\n  string value = 1;\n}\n\n"
        );
    }

    #[test]
    fn self_referencing_object_is_materialized_once() {
        let components = user_components();
        let derived =
            SchemaDeriver::derive(None, &components, &SchemaNode::reference("User"), "input")
                .expect("推导");
        assert!(!derived.wrapped);
        assert_eq!(derived.root_message, "User");
        let user = derived.proto.message("User").expect("User 存在");
        assert_eq!(user.fields[1].ty, FieldType::Message("User".into()));
        assert_eq!(derived.proto.messages().count(), 1);
    }

    #[test]
    fn scalar_table_follows_formats() {
        let ctx = "Root.x";
        assert_eq!(scalar_type(ScalarKind::Integer, None, ctx), Ok(ScalarType::Int64));
        assert_eq!(scalar_type(ScalarKind::Integer, Some("int16"), ctx), Ok(ScalarType::Int32));
        assert_eq!(scalar_type(ScalarKind::Number, None, ctx), Ok(ScalarType::Double));
        assert_eq!(scalar_type(ScalarKind::String, Some("byte"), ctx), Ok(ScalarType::Bytes));
        assert_eq!(scalar_type(ScalarKind::String, Some("date-time"), ctx), Ok(ScalarType::Int64));
        assert_eq!(scalar_type(ScalarKind::String, Some("uuid"), ctx), Ok(ScalarType::String));
        assert!(scalar_type(ScalarKind::String, Some("binary"), ctx).is_err());
        assert!(scalar_type(ScalarKind::File, None, ctx).is_err());
        assert!(scalar_type(ScalarKind::Integer, Some("int128"), ctx).is_err());
    }

    #[test]
    fn enum_name_is_content_addressed() {
        let values = vec!["RED".to_owned(), "GREEN".to_owned()];
        let name = enum_name(&values);
        assert!(name.starts_with("Enum_"));
        assert_eq!(name.len(), "Enum_".len() + 64);
        assert_eq!(name, enum_name(&values));
        assert_ne!(name, enum_name(&["GREEN".to_owned(), "RED".to_owned()]));
    }

    #[test]
    fn anonymous_objects_take_owner_and_property_name() {
        let root = SchemaNode::object(
            ObjectSchema::named("Order").property(
                "address",
                SchemaNode::object(ObjectSchema::anonymous().property("city", SchemaNode::string())),
            ),
        );
        let components = Components::new();
        let derived = SchemaDeriver::derive(None, &components, &root, "input").expect("推导");
        assert!(derived.proto.message("OrderAddress").is_some());
    }

    #[test]
    fn structurally_different_objects_with_same_name_conflict() {
        let root = SchemaNode::object(
            ObjectSchema::named("Root")
                .property(
                    "a",
                    SchemaNode::object(ObjectSchema::named("Item").property("x", SchemaNode::string())),
                )
                .property(
                    "b",
                    SchemaNode::object(ObjectSchema::named("Item").property("y", SchemaNode::int32())),
                ),
        );
        let components = Components::new();
        let err = SchemaDeriver::derive(None, &components, &root, "input").unwrap_err();
        assert_eq!(err, ProtoError::NameConflict { name: "Item".into() });
    }

    #[test]
    fn package_dashes_are_escaped() {
        let components = Components::new();
        let derived = SchemaDeriver::derive(
            Some("app-a.svc-b"),
            &components,
            &SchemaNode::boolean(),
            "input",
        )
        .expect("推导");
        assert_eq!(derived.proto.package.as_deref(), Some("app_a.svc_b"));
    }
}
