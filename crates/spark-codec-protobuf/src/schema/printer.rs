//! IDL 文本打印。
//!
//! 输出布局固定：`syntax`、`import`、`package` 依次成行，空行后是按声明顺序排列的消息与枚举，
//! 每个块之后跟一个空行，最后是服务块。注解以 `//` 前缀写在所属定义上方。

use std::fmt;

use super::{Definition, EnumDef, FieldDef, MessageDef, Proto, ServiceDef};

/// 打印为 IDL 文本。
pub fn print(proto: &Proto) -> String {
    proto.to_string()
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "syntax = \"{}\";", self.syntax)?;
        for import in &self.imports {
            writeln!(f, "import \"{import}\";")?;
        }
        if let Some(package) = &self.package {
            writeln!(f, "package {package};")?;
        }
        writeln!(f)?;
        for definition in &self.definitions {
            match definition {
                Definition::Message(message) => write_message(f, message)?,
                Definition::Enum(enumeration) => write_enum(f, enumeration)?,
            }
            writeln!(f)?;
        }
        for service in &self.services {
            write_service(f, service)?;
        }
        Ok(())
    }
}

fn write_annotations(f: &mut fmt::Formatter<'_>, indent: &str, annotations: &[String]) -> fmt::Result {
    for annotation in annotations {
        writeln!(f, "{indent}//{annotation}")?;
    }
    Ok(())
}

fn write_message(f: &mut fmt::Formatter<'_>, message: &MessageDef) -> fmt::Result {
    write_annotations(f, "", &message.annotations)?;
    writeln!(f, "message {} {{", message.name)?;
    for field in &message.fields {
        write_field(f, field)?;
    }
    writeln!(f, "}}")
}

fn write_field(f: &mut fmt::Formatter<'_>, field: &FieldDef) -> fmt::Result {
    let label = if field.repeated { "repeated " } else { "" };
    writeln!(
        f,
        "  {label}{} {} = {};",
        field.ty.type_name(),
        field.name,
        field.tag
    )
}

fn write_enum(f: &mut fmt::Formatter<'_>, enumeration: &EnumDef) -> fmt::Result {
    write_annotations(f, "", &enumeration.annotations)?;
    writeln!(f, "enum {} {{", enumeration.name)?;
    for (ordinal, value) in enumeration.values.iter().enumerate() {
        writeln!(f, "  {value} = {ordinal};")?;
    }
    writeln!(f, "}}")
}

fn write_service(f: &mut fmt::Formatter<'_>, service: &ServiceDef) -> fmt::Result {
    writeln!(f, "service {} {{", service.name)?;
    for (index, rpc) in service.rpcs.iter().enumerate() {
        if index > 0 {
            writeln!(f)?;
        }
        write_annotations(f, "  ", &rpc.annotations)?;
        writeln!(f, "  rpc {} ({}) returns ({});", rpc.name, rpc.arg, rpc.ret)?;
    }
    writeln!(f, "}}")
}
