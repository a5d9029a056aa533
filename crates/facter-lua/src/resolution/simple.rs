use super::{add_common_methods, Resolvable, ResolutionCore, ResolutionKind};
use crate::bridge;
use crate::error::BridgeError;
use mlua::{Function, Lua, UserData, UserDataMethods, Value};
use parking_lot::Mutex;

#[derive(Clone)]
enum Code {
    Command(String),
    Block(Function),
    Constant(Value),
}

/// Resolution with a single `setcode`.
///
/// ```lua
/// Facter.add("hostname", function(r)
///   r:confine("kernel", "Linux")
///   r:setcode("hostname -s")
/// end)
/// ```
pub struct SimpleResolution {
    core: ResolutionCore,
    code: Mutex<Option<Code>>,
}

impl SimpleResolution {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            core: ResolutionCore::new(name),
            code: Mutex::new(None),
        }
    }

    fn setcode(&self, value: Value) -> mlua::Result<()> {
        let code = match value {
            Value::String(s) => Code::Command(s.to_string_lossy().to_string()),
            Value::Function(f) => Code::Block(f),
            other => {
                return Err(BridgeError::argument_type(format!(
                    "setcode expects a command string or a function, got {}",
                    other.type_name()
                ))
                .into_lua())
            }
        };
        *self.code.lock() = Some(code);
        Ok(())
    }
}

impl Resolvable for SimpleResolution {
    const KIND: ResolutionKind = ResolutionKind::Simple;

    fn core(&self) -> &ResolutionCore {
        &self.core
    }

    fn resolve(&self, lua: &Lua) -> mlua::Result<Value> {
        let code = self.code.lock().clone();
        match code {
            None => Ok(Value::Nil),
            Some(Code::Constant(value)) => Ok(value),
            Some(Code::Block(block)) => block.call::<Value>(()),
            Some(Code::Command(command)) => {
                bridge::execute_command(lua, &command, Value::Nil, false)
            }
        }
    }

    fn set_constant(&self, value: Value) -> Result<(), BridgeError> {
        *self.code.lock() = Some(Code::Constant(value));
        Ok(())
    }
}

impl UserData for SimpleResolution {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_common_methods(methods);

        // r:setcode(command | function)
        methods.add_method("setcode", |_, this, value: Value| this.setcode(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_code_resolves_to_nil() {
        let lua = Lua::new();
        let r = SimpleResolution::new(None);
        assert!(r.resolve(&lua).unwrap().is_nil());
    }

    #[test]
    fn block_code_is_called() {
        let lua = Lua::new();
        let ud = lua
            .create_userdata(SimpleResolution::new(Some("from_block".into())))
            .unwrap();
        lua.globals().set("r", ud.clone()).unwrap();
        lua.load(r#"r:setcode(function() return "4096" end)"#)
            .exec()
            .unwrap();

        let r = ud.borrow::<SimpleResolution>().unwrap();
        let value: String = lua.unpack(r.resolve(&lua).unwrap()).unwrap();
        assert_eq!(value, "4096");
        assert_eq!(r.core().name(), Some("from_block"));
    }

    #[test]
    fn constant_code() {
        let lua = Lua::new();
        let r = SimpleResolution::new(None);
        r.set_constant(Value::Integer(7)).unwrap();
        assert_eq!(r.resolve(&lua).unwrap(), Value::Integer(7));
    }

    #[test]
    fn setcode_rejects_other_types() {
        let lua = Lua::new();
        let ud = lua.create_userdata(SimpleResolution::new(None)).unwrap();
        lua.globals().set("r", ud).unwrap();
        let err = lua.load("r:setcode(42)").exec().unwrap_err();
        assert!(err.to_string().contains("setcode expects"));
    }
}
