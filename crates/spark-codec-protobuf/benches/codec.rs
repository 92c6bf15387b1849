use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use spark_codec_protobuf::{
    Components, Contract, ObjectSchema, Operation, ScopedMapperCache, SchemaNode, TypeDescriptor,
    Value,
};

fn order_contract() -> Contract {
    let components = Components::new()
        .with(
            "Line",
            SchemaNode::object(
                ObjectSchema::anonymous()
                    .property("sku", SchemaNode::string())
                    .property("quantity", SchemaNode::int32())
                    .property("price", SchemaNode::number()),
            ),
        )
        .with(
            "Order",
            SchemaNode::object(
                ObjectSchema::anonymous()
                    .property("id", SchemaNode::string())
                    .property("lines", SchemaNode::array(SchemaNode::reference("Line")))
                    .property("samples", SchemaNode::array(SchemaNode::int64()))
                    .property("labels", SchemaNode::map(SchemaNode::string())),
            ),
        );
    Contract::new("bench.orders").components(components).operation(
        Operation::new("placeOrder")
            .parameter("order", SchemaNode::reference("Order"))
            .response("200", Some(SchemaNode::reference("Order"))),
    )
}

fn sample_order() -> Value {
    let lines = (0..16)
        .map(|index| {
            Value::from_entries([
                ("sku", Value::from(format!("SKU-{index}"))),
                ("quantity", Value::Int32(index)),
                ("price", Value::Double(f64::from(index) * 1.25)),
            ])
        })
        .collect();
    Value::from_entries([
        ("id", Value::from("order-1")),
        ("lines", Value::List(lines)),
        ("samples", Value::List((0..64).map(Value::Int64).collect())),
        (
            "labels",
            Value::from_entries([("channel", Value::from("web")), ("region", Value::from("eu"))]),
        ),
    ])
}

/// 动态订单的编码与解码吞吐。
///
/// # 设计目的（Why）
/// - 覆盖热路径上的嵌套消息、packed 数值与映射字段，回归时能直接看到编解码器的单次开销；
/// - 编解码器在计时前取得，测量不包含推导与编译。
fn bench_dynamic_order(c: &mut Criterion) {
    let cache = ScopedMapperCache::default();
    let contract = cache
        .get_or_create("orders", &order_contract())
        .expect("构建契约编解码器");
    let request = contract
        .operation("placeOrder")
        .expect("操作存在")
        .request()
        .clone();
    let writer = request
        .writer_for(&TypeDescriptor::Dynamic)
        .expect("编码器");
    let reader = request
        .reader_for(&TypeDescriptor::Dynamic)
        .expect("解码器");
    let order = sample_order();
    let bytes = writer.serialize(&order).expect("编码");

    c.bench_function("protobuf/encode_order", |b| {
        b.iter(|| writer.serialize(black_box(&order)).expect("编码"))
    });
    c.bench_function("protobuf/decode_order", |b| {
        b.iter(|| reader.deserialize(black_box(&bytes)).expect("解码"))
    });
}

/// 首次访问的推导与编译成本，每次迭代使用全新缓存。
fn bench_cold_contract(c: &mut Criterion) {
    let contract = order_contract();
    c.bench_function("protobuf/cold_contract", |b| {
        b.iter_batched(
            ScopedMapperCache::default,
            |cache| cache.get_or_create("orders", black_box(&contract)).expect("构建"),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(protobuf_benches, bench_dynamic_order, bench_cold_contract);
criterion_main!(protobuf_benches);
