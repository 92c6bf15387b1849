//! # bean 模块说明
//!
//! ## 核心意图（Why）
//! - 用显式的 [`BeanDescriptor`] 取代运行时反射：每个运行时类型只在首次使用时声明一次属性表，
//!   之后编解码热路径只调用已绑定的访问器闭包，不再检查类型结构；
//! - [`TypeDescriptor`] 描述调用方期望的运行时形状（动态映射、强类型对象、集合、原始数组、映射），
//!   解码器据此选择重复字段策略与嵌套读取器。
//!
//! ## 使用方式（How）
//! ```
//! use spark_codec_protobuf::{BeanDescriptorBuilder, Describe, TypeDescriptor, Value};
//!
//! #[derive(Clone, Debug, Default, PartialEq)]
//! struct User {
//!     name: String,
//! }
//!
//! impl Describe for User {
//!     const BEAN_NAME: &'static str = "User";
//!
//!     fn describe(builder: BeanDescriptorBuilder<Self>) -> BeanDescriptorBuilder<Self> {
//!         builder.property(
//!             "name",
//!             TypeDescriptor::Dynamic,
//!             |user| Value::from(user.name.clone()),
//!             |user, value| {
//!                 user.name = String::try_from(value)?;
//!                 Ok(())
//!             },
//!         )
//!     }
//! }
//! ```
//!
//! ## 并发契约（What）
//! - [`BeanDescriptorManager`] 以 `DashMap` entry 锁保证每个类型的描述符只构建一次；
//! - 描述符构建完成后不可变，以 `Arc` 在任意线程间共享。

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{ProtoError, Result};
use crate::value::Value;

/// 可被描述为 Bean 的运行时类型。
///
/// `BEAN_NAME` 同时作为 Any 字段打包时的类型标识：与线格式消息同名的 Bean 会按该消息编码。
pub trait Describe: Default + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const BEAN_NAME: &'static str;

    fn describe(builder: BeanDescriptorBuilder<Self>) -> BeanDescriptorBuilder<Self>;
}

/// 类型擦除后的 Bean 能力集合，由 [`Describe`] 自动实现。
pub trait Bean: Any + Send + Sync + fmt::Debug {
    fn bean_type(&self) -> BeanType;

    fn clone_bean(&self) -> Box<dyn Bean>;

    fn eq_bean(&self, other: &dyn Bean) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Describe> Bean for T {
    fn bean_type(&self) -> BeanType {
        BeanType::of::<T>()
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn eq_bean(&self, other: &dyn Bean) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// 运行时类型身份：`TypeId` + 名称 + 描述符构造函数。
///
/// 相等性与哈希只看 `TypeId`。
#[derive(Clone, Copy)]
pub struct BeanType {
    id: TypeId,
    name: &'static str,
    build: fn() -> BeanDescriptor,
}

impl BeanType {
    pub fn of<T: Describe>() -> Self {
        BeanType {
            id: TypeId::of::<T>(),
            name: T::BEAN_NAME,
            build: build_descriptor::<T>,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn build(&self) -> BeanDescriptor {
        (self.build)()
    }
}

impl PartialEq for BeanType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BeanType {}

impl Hash for BeanType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for BeanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BeanType").field(&self.name).finish()
    }
}

fn build_descriptor<T: Describe>() -> BeanDescriptor {
    T::describe(BeanDescriptorBuilder::new()).build()
}

fn instantiate<T: Describe>() -> Box<dyn Bean> {
    Box::new(T::default())
}

/// 调用方期望的运行时形状。
///
/// # 教案式说明
/// - **Dynamic**：消息解码为 [`Value::Map`]，标量保持线格式对应的变体；
/// - **Bean**：消息解码为强类型对象；
/// - **List**/**Array**：重复字段的两种策略，`Array` 仅对数值/布尔标量生效，其余退化为 `List`；
/// - **Map**：`map<K, V>` 字段，值按内层描述符解码。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Dynamic,
    Bean(BeanType),
    List(Box<TypeDescriptor>),
    Array,
    Map(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn bean<T: Describe>() -> Self {
        TypeDescriptor::Bean(BeanType::of::<T>())
    }

    pub fn list(element: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(element))
    }

    pub fn map(value: TypeDescriptor) -> Self {
        TypeDescriptor::Map(Box::new(value))
    }

    /// 单值或集合元素所用的描述符：容器描述符剥去一层，其余原样返回。
    pub(crate) fn element(&self) -> &TypeDescriptor {
        match self {
            TypeDescriptor::List(inner) | TypeDescriptor::Map(inner) => inner,
            other => other,
        }
    }
}

pub(crate) type Getter = Arc<dyn Fn(&dyn Any) -> Value + Send + Sync>;
pub(crate) type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> Result<()> + Send + Sync>;

/// 单个属性的访问器绑定。
#[derive(Clone)]
pub struct PropertyDescriptor {
    name: &'static str,
    ty: TypeDescriptor,
    getter: Option<Getter>,
    setter: Option<Setter>,
}

impl PropertyDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn is_readable(&self) -> bool {
        self.getter.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    /// 读取属性；没有 getter 时返回 `None`。
    pub fn get(&self, bean: &dyn Bean) -> Option<Value> {
        self.getter.as_ref().map(|getter| getter(bean.as_any()))
    }

    pub(crate) fn setter(&self) -> Option<&Setter> {
        self.setter.as_ref()
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// 额外属性槽：承接没有对应属性的线格式字段。
trait ExtrasSlot: Send + Sync {
    fn get<'a>(&self, bean: &'a dyn Any) -> Option<&'a BTreeMap<String, Value>>;

    fn get_mut<'a>(&self, bean: &'a mut dyn Any) -> Option<&'a mut BTreeMap<String, Value>>;
}

struct TypedExtras<T> {
    get: fn(&T) -> &BTreeMap<String, Value>,
    get_mut: fn(&mut T) -> &mut BTreeMap<String, Value>,
}

impl<T: Describe> ExtrasSlot for TypedExtras<T> {
    fn get<'a>(&self, bean: &'a dyn Any) -> Option<&'a BTreeMap<String, Value>> {
        bean.downcast_ref::<T>().map(self.get)
    }

    fn get_mut<'a>(&self, bean: &'a mut dyn Any) -> Option<&'a mut BTreeMap<String, Value>> {
        bean.downcast_mut::<T>().map(self.get_mut)
    }
}

/// 描述符构建器，由 [`Describe::describe`] 填充。
pub struct BeanDescriptorBuilder<T> {
    properties: Vec<PropertyDescriptor>,
    extras: Option<Arc<dyn ExtrasSlot>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Describe> BeanDescriptorBuilder<T> {
    fn new() -> Self {
        BeanDescriptorBuilder {
            properties: Vec::new(),
            extras: None,
            _marker: PhantomData,
        }
    }

    /// 声明可读写属性。
    pub fn property(
        self,
        name: &'static str,
        ty: TypeDescriptor,
        get: fn(&T) -> Value,
        set: fn(&mut T, Value) -> Result<()>,
    ) -> Self {
        self.push(name, ty, Some(get), Some(set))
    }

    /// 声明只读属性：参与编码，解码时被忽略。
    pub fn read_only(self, name: &'static str, ty: TypeDescriptor, get: fn(&T) -> Value) -> Self {
        self.push(name, ty, Some(get), None)
    }

    /// 声明只写属性：参与解码，编码时被忽略。
    pub fn write_only(
        self,
        name: &'static str,
        ty: TypeDescriptor,
        set: fn(&mut T, Value) -> Result<()>,
    ) -> Self {
        self.push(name, ty, None, Some(set))
    }

    /// 声明额外属性槽。
    pub fn extras(
        mut self,
        get: fn(&T) -> &BTreeMap<String, Value>,
        get_mut: fn(&mut T) -> &mut BTreeMap<String, Value>,
    ) -> Self {
        self.extras = Some(Arc::new(TypedExtras { get, get_mut }));
        self
    }

    fn push(
        mut self,
        name: &'static str,
        ty: TypeDescriptor,
        get: Option<fn(&T) -> Value>,
        set: Option<fn(&mut T, Value) -> Result<()>>,
    ) -> Self {
        let getter = get.map(|get| {
            Arc::new(move |bean: &dyn Any| bean.downcast_ref::<T>().map_or(Value::Null, get))
                as Getter
        });
        let setter = set.map(|set| {
            Arc::new(move |bean: &mut dyn Any, value: Value| match bean.downcast_mut::<T>() {
                Some(bean) => set(bean, value),
                None => Err(ProtoError::mismatch(name, T::BEAN_NAME, "foreign bean")),
            }) as Setter
        });
        let property = PropertyDescriptor {
            name,
            ty,
            getter,
            setter,
        };
        // 同名属性以后声明者为准。
        match self.properties.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
        self
    }

    fn build(self) -> BeanDescriptor {
        let index = self
            .properties
            .iter()
            .enumerate()
            .map(|(position, property)| (property.name, position))
            .collect();
        BeanDescriptor {
            bean_type: BeanType::of::<T>(),
            properties: self.properties,
            index,
            factory: instantiate::<T>,
            extras: self.extras,
        }
    }
}

/// 运行时类型的属性表。
pub struct BeanDescriptor {
    bean_type: BeanType,
    properties: Vec<PropertyDescriptor>,
    index: HashMap<&'static str, usize>,
    factory: fn() -> Box<dyn Bean>,
    extras: Option<Arc<dyn ExtrasSlot>>,
}

impl BeanDescriptor {
    pub fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    pub fn name(&self) -> &'static str {
        self.bean_type.name()
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.index.get(name).map(|&position| &self.properties[position])
    }

    /// 创建一个默认值实例。
    pub fn instantiate(&self) -> Box<dyn Bean> {
        (self.factory)()
    }

    pub fn has_extras(&self) -> bool {
        self.extras.is_some()
    }

    pub fn extras<'a>(&self, bean: &'a dyn Bean) -> Option<&'a BTreeMap<String, Value>> {
        self.extras.as_ref()?.get(bean.as_any())
    }

    pub fn extras_mut<'a>(
        &self,
        bean: &'a mut dyn Bean,
    ) -> Option<&'a mut BTreeMap<String, Value>> {
        self.extras.as_ref()?.get_mut(bean.as_any_mut())
    }
}

impl fmt::Debug for BeanDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDescriptor")
            .field("bean_type", &self.bean_type)
            .field("properties", &self.properties)
            .field("extras", &self.has_extras())
            .finish()
    }
}

/// 按运行时类型缓存描述符。
#[derive(Debug, Default)]
pub struct BeanDescriptorManager {
    descriptors: DashMap<TypeId, Arc<BeanDescriptor>>,
}

impl BeanDescriptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或构建描述符；entry 锁保证同一类型只构建一次。
    pub fn get_or_create(&self, bean_type: BeanType) -> Arc<BeanDescriptor> {
        self.descriptors
            .entry(bean_type.id())
            .or_insert_with(|| {
                debug!(bean = bean_type.name(), "building bean descriptor");
                Arc::new(bean_type.build())
            })
            .clone()
    }

    pub fn descriptor_of<T: Describe>(&self) -> Arc<BeanDescriptor> {
        self.get_or_create(BeanType::of::<T>())
    }

    /// 将对象展开为动态映射，嵌套对象递归展开；额外属性先写入，同名属性覆盖之。
    pub fn snapshot(&self, bean: &dyn Bean) -> Value {
        let descriptor = self.get_or_create(bean.bean_type());
        let mut map = BTreeMap::new();
        if let Some(extras) = descriptor.extras(bean) {
            for (key, value) in extras {
                map.insert(key.clone(), self.snapshot_value(value));
            }
        }
        for property in descriptor.properties() {
            if let Some(value) = property.get(bean)
                && !value.is_null()
            {
                map.insert(property.name().to_owned(), self.snapshot_value(&value));
            }
        }
        Value::Map(map)
    }

    /// 展开值中出现的全部对象。
    pub fn snapshot_value(&self, value: &Value) -> Value {
        match value {
            Value::Bean(bean) => self.snapshot(bean.as_bean()),
            Value::List(items) => {
                Value::List(items.iter().map(|item| self.snapshot_value(item)).collect())
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.snapshot_value(item)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
