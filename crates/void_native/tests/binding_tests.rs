//! Integration tests for void_native (type documents over synthetic memory)

use parking_lot::Mutex;
use std::sync::Arc;
use void_native::*;

/// A zeroed block of native memory kept alive by the test
struct Block {
    storage: Vec<u64>,
}

impl Block {
    fn new(words: usize) -> Self {
        Self {
            storage: vec![0; words],
        }
    }

    fn address(&mut self) -> NativeAddress {
        NativeAddress::from_ptr(self.storage.as_mut_ptr())
    }
}

fn manager() -> Arc<TypeManager> {
    TypeManager::new(ManagerConfig::default())
}

#[test]
fn test_registration_replaces() {
    let manager = manager();
    manager.create_type_from_str("Entity", "size = 8", &[]).unwrap();
    manager.create_type_from_str("Entity", "size = 32", &[]).unwrap();

    assert_eq!(manager.type_names(), vec!["Entity".to_string()]);
    assert_eq!(manager.get_class("Entity").unwrap().size(), Some(32));
}

#[test]
fn test_convert_unknown_name() {
    let manager = manager();
    let err = manager.convert("Nope", NativeAddress::new(0x1000)).unwrap_err();
    assert!(matches!(err, BindError::UnknownClass(_)));
}

#[test]
fn test_wrap_needs_one_address() {
    let manager = manager();
    let class = manager.create_type_from_str("Entity", "", &[]).unwrap();

    let err = Instance::wrap(&class, &[Value::Int(0x1000), Value::Int(0x2000)]).unwrap_err();
    assert!(matches!(err, BindError::InvalidArguments { .. }));
    assert!(Instance::wrap(&class, &[]).is_err());

    let instance = Instance::wrap(&class, &[Value::Int(0x1000)]).unwrap();
    assert_eq!(instance.address(), NativeAddress::new(0x1000));
    assert!(!instance.is_owning());
}

#[test]
fn test_allocate_needs_size() {
    let manager = manager();
    let class = manager.create_type_from_str("Entity", "", &[]).unwrap();

    let err = Instance::allocate(&class, &[], true).unwrap_err();
    assert!(matches!(err, BindError::MissingSize(name) if name == "Entity"));
}

#[test]
fn test_allocate_rejects_arguments_without_constructor() {
    let manager = manager();
    let class = manager.create_type_from_str("Entity", "size = 16", &[]).unwrap();

    let err = Instance::allocate(&class, &[Value::Int(1)], true).unwrap_err();
    assert!(matches!(err, BindError::InvalidArguments { .. }));
}

#[test]
fn test_unregistered_class_rejected() {
    let manager = manager();
    let class = Arc::new(manager.build_type("Loose", TypeDefinition::new().size(8), &[]).unwrap());

    let err = Instance::wrap(&class, &[Value::Int(0x1000)]).unwrap_err();
    assert!(matches!(err, BindError::NotRegistered(_)));
}

#[test]
fn test_instance_attribute() {
    let manager = manager();
    let class = manager
        .create_type_from_str(
            "Entity",
            r#"
            [instance_attribute.health]
            type = "int"
            offset = 4
            doc = "Hit points"

            [instance_attribute.speed]
            type = "float"
            offset = 8

            [instance_attribute.alive]
            type = "bool"
            offset = 12
            "#,
            &[],
        )
        .unwrap();

    let mut block = Block::new(4);
    let entity = Instance::wrap(&class, &[Value::Pointer(block.address())]).unwrap();

    entity.set("health", 75).unwrap();
    entity.set("speed", 1.5).unwrap();
    entity.set("alive", true).unwrap();

    assert_eq!(entity.get("health").unwrap(), Value::Int(75));
    assert_eq!(entity.get("speed").unwrap(), Value::Float(1.5));
    assert_eq!(entity.get("alive").unwrap(), Value::Bool(true));
    assert_eq!(entity.doc("health"), Some("Hit points"));
    assert_eq!(block.storage[0] >> 32, 75);

    assert!(matches!(entity.get("mana"), Err(BindError::UnknownMember { .. })));
    assert!(matches!(
        entity.set("health", 1i64 << 40),
        Err(BindError::ValueOutOfRange { .. })
    ));
}

#[test]
fn test_dynamic_pointer_array() {
    let manager = manager();
    let class = manager
        .create_type_from_str(
            "Squad",
            r#"
            [dynamic_pointer_array.scores]
            type = "int"
            offset = 8
            length = 3
            "#,
            &[],
        )
        .unwrap();

    let mut scores = [0i32; 3];
    let mut slots: Vec<usize> = scores.iter_mut().map(|s| s as *mut i32 as usize).collect();
    let mut block = Block::new(2);
    block.storage[1] = slots.as_mut_ptr() as u64;

    let squad = Instance::wrap(&class, &[Value::Pointer(block.address())]).unwrap();
    squad.set("scores", vec![10, 20, 30]).unwrap();

    let array = squad.array("scores").unwrap();
    assert_eq!(array.len(), Some(3));
    assert_eq!(
        array.to_vec().unwrap(),
        vec![Value::Int(10), Value::Int(20), Value::Int(30)]
    );
    assert!(matches!(
        array.get(3),
        Err(BindError::IndexOutOfBounds { index: 3, length: 3 })
    ));
    assert_eq!(scores, [10, 20, 30]);
}

#[test]
fn test_static_instance_array() {
    let manager = manager();
    let class = manager
        .create_type_from_str(
            "Inventory",
            r#"
            [static_instance_array.ammo]
            type = "short"
            offset = 2
            length = 4
            "#,
            &[],
        )
        .unwrap();

    let mut block = Block::new(2);
    let inventory = Instance::wrap(&class, &[Value::Pointer(block.address())]).unwrap();
    let ammo = inventory.array("ammo").unwrap();

    ammo.set(0, 7).unwrap();
    ammo.set(3, -1).unwrap();
    assert_eq!(ammo.base(), block.address() + 2);
    assert_eq!(ammo.get(3).unwrap(), Value::Int(-1));
    assert_eq!(block.storage[0] & 0xffff_0000, 7 << 16);
}

#[test]
fn test_platform_override() {
    let text = r#"
        [instance_attribute.flags]
        type = "uint"
        offset = 0
        offset_windows = 4
    "#;

    let config = ManagerConfig {
        platform: "windows".into(),
        ..ManagerConfig::default()
    };
    let manager = TypeManager::new(config);
    let class = manager.create_type_from_str("Entity", text, &[]).unwrap();

    let mut block = Block::new(1);
    let entity = Instance::wrap(&class, &[Value::Pointer(block.address())]).unwrap();
    entity.set("flags", 5u32).unwrap();
    assert_eq!(block.storage[0] >> 32, 5);
}

#[test]
fn test_missing_symbol_leaves_registry_untouched() {
    let manager = manager();
    manager
        .binaries()
        .register(SymbolTable::new("server").with_symbol("Present", NativeAddress::new(0x1000)));

    let err = manager
        .create_type_from_str(
            "Entity",
            r#"
            binary = "server"

            [instance_attribute.health]
            type = "int"
            offset = 4

            [function.present]
            identifier = "Present"

            [function.missing]
            identifier = "Missing"
            "#,
            &[],
        )
        .unwrap_err();

    assert!(matches!(err, BindError::SymbolNotFound { symbol, .. } if symbol == "Missing"));
    assert!(!manager.contains("Entity"));
}

#[test]
fn test_function_without_identifier_is_rejected() {
    let manager = manager();
    let err = manager
        .create_type_from_str(
            "Entity",
            r#"
            binary = "server"

            [function.think]
            args = ["int"]
            "#,
            &[],
        )
        .unwrap_err();

    assert!(matches!(err, BindError::Schema { .. }));
    assert!(matches!(manager.get_class("Entity"), Err(BindError::UnknownClass(_))));
}

#[test]
fn test_custom_field_types_resolve_lazily() {
    let manager = manager();
    let entity = manager
        .create_type_from_str(
            "Entity",
            r#"
            [instance_attribute.origin]
            type = "Vector"
            offset = 8

            [pointer_attribute.target]
            type = "Vector"
            offset = 0
            "#,
            &[],
        )
        .unwrap();

    let mut block = Block::new(4);
    let object = Instance::wrap(&entity, &[Value::Pointer(block.address())]).unwrap();
    assert!(matches!(object.get("origin"), Err(BindError::UnknownClass(_))));

    manager
        .create_type_from_str(
            "Vector",
            r#"
            size = 12

            [instance_attribute.x]
            type = "float"
            offset = 0

            [instance_attribute.y]
            type = "float"
            offset = 4

            [instance_attribute.z]
            type = "float"
            offset = 8
            "#,
            &[],
        )
        .unwrap();

    let origin = object.get("origin").unwrap();
    let origin = origin.as_object().unwrap();
    assert_eq!(origin.address(), block.address() + 8);
    origin.set("y", 2.5).unwrap();
    assert_eq!(object.get("origin").unwrap().as_object().unwrap().get("y").unwrap(), Value::Float(2.5));

    // Null pointer attributes of custom types read as void
    assert_eq!(object.get("target").unwrap(), Value::Void);
}

#[test]
fn test_custom_field_write_copies_bytes() {
    let manager = manager();
    let vector = manager
        .create_type(
            "Vector",
            TypeDefinition::new()
                .size(12)
                .instance_attribute("x", "float", 0)
                .instance_attribute("y", "float", 4)
                .instance_attribute("z", "float", 8),
            &[],
        )
        .unwrap();
    let entity = manager
        .create_type("Entity", TypeDefinition::new().instance_attribute("origin", "Vector", 4), &[])
        .unwrap();

    let source = Instance::allocate(&vector, &[], true).unwrap();
    source.set("x", 1.0).unwrap();
    source.set("y", 2.0).unwrap();
    source.set("z", 3.0).unwrap();

    let mut block = Block::new(3);
    let object = Instance::wrap(&entity, &[Value::Pointer(block.address())]).unwrap();
    object.set("origin", source.object().clone()).unwrap();

    let origin = object.get("origin").unwrap();
    let origin = origin.as_object().unwrap();
    assert_eq!(origin.get("z").unwrap(), Value::Float(3.0));
    assert!(matches!(object.set("origin", 5), Err(BindError::TypeMismatch { .. })));
}

#[test]
fn test_custom_array_rejects_null_source() {
    let manager = manager();
    manager.create_type("Vector", TypeDefinition::new().size(8), &[]).unwrap();
    let squad = manager
        .create_type_from_str(
            "Squad",
            r#"
            [static_instance_array.positions]
            type = "Vector"
            offset = 0
            length = 2
            "#,
            &[],
        )
        .unwrap();

    let mut block = Block::new(2);
    let object = Instance::wrap(&squad, &[Value::Pointer(block.address())]).unwrap();
    let positions = object.array("positions").unwrap();

    let null = manager.convert("Vector", NativeAddress::new(0)).unwrap();
    assert!(matches!(positions.set(1, null), Err(BindError::NullPointer(_))));
    assert_eq!(block.storage, vec![0, 0]);
}

#[test]
fn test_bases_are_inherited() {
    let manager = manager();
    let base = manager
        .create_type(
            "BaseEntity",
            TypeDefinition::new().size(16).instance_attribute("health", "int", 8),
            &[],
        )
        .unwrap();
    let player = manager
        .create_type(
            "Player",
            TypeDefinition::new().instance_attribute("armor", "int", 12),
            &[ClassRef::Custom(base)],
        )
        .unwrap();

    assert_eq!(player.size(), Some(16));
    assert!(player.member("health").is_some());

    let instance = Instance::allocate(&player, &[], true).unwrap();
    instance.set("health", 100).unwrap();
    instance.set("armor", 50).unwrap();
    assert_eq!(instance.get("health").unwrap(), Value::Int(100));
    assert_eq!(instance.get("armor").unwrap(), Value::Int(50));
}

#[test]
fn test_destructor_runs_once_before_release() {
    let manager = manager();
    let events = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&events);
    let definition = TypeDefinition::new()
        .size(16)
        .instance_attribute("id", "int", 0)
        .destructor(Hook::callback(move |object, _| {
            // Still readable: the block is released after this returns
            let id = object.get("id")?.as_int().unwrap_or(-1);
            recorded.lock().push(id);
            Ok(())
        }));
    let class = manager.create_type("Tracked", definition, &[]).unwrap();

    let first = Instance::allocate(&class, &[], false).unwrap();
    first.set("id", 1).unwrap();
    first.dealloc().unwrap();

    {
        let second = Instance::allocate(&class, &[], true).unwrap();
        second.set("id", 2).unwrap();
    }

    let third = Instance::allocate(&class, &[], false).unwrap();
    third.set("id", 3).unwrap();
    let address = third.address();
    drop(third);

    assert_eq!(*events.lock(), vec![1, 2]);

    // The block now belongs to native code and is still readable
    let leaked = Instance::wrap(&class, &[Value::Pointer(address)]).unwrap();
    assert_eq!(leaked.get("id").unwrap(), Value::Int(3));
    assert!(leaked.dealloc().is_err());
}

#[test]
fn test_constructor_callback_receives_arguments() {
    let manager = manager();
    let definition = TypeDefinition::new()
        .size(8)
        .instance_attribute("value", "int", 0)
        .constructor(Hook::callback(|object, args| {
            let value = args.first().cloned().unwrap_or(Value::Int(0));
            object.set("value", value)
        }));
    let class = manager.create_type("Boxed", definition, &[]).unwrap();

    let boxed = Instance::allocate(&class, &[Value::Int(9)], true).unwrap();
    assert_eq!(boxed.get("value").unwrap(), Value::Int(9));
}

#[test]
fn test_pipe_documents() {
    let manager = manager();
    manager.binaries().register(
        SymbolTable::new("engine")
            .with_symbol("GetTime", NativeAddress::new(0x1000))
            .with_symbol("Print", NativeAddress::new(0x2000)),
    );

    let pipe = manager
        .create_pipe_from_str(
            r#"
            [get_time]
            binary = "engine"
            identifier = "GetTime"
            return_type = "double"

            [print]
            binary = "engine"
            identifier = "Print"
            args = "string, int"
            doc = "Print to the console"
            "#,
        )
        .unwrap();

    assert_eq!(pipe.names().collect::<Vec<_>>(), vec!["get_time", "print"]);
    assert_eq!(pipe.function("print").unwrap().address(), NativeAddress::new(0x2000));
    assert_eq!(pipe.function("print").unwrap().doc(), Some("Print to the console"));
    assert!(matches!(pipe.call("missing", &[]), Err(BindError::UnknownMember { .. })));
    assert!(matches!(
        pipe.call("print", &[Value::from("hi")]),
        Err(BindError::ArgumentCount { expected: 2, got: 1 })
    ));
}

#[test]
fn test_pipe_missing_binary() {
    let manager = manager();
    let err = manager
        .create_pipe_from_str("[f]\nbinary = \"ghost\"\nidentifier = \"f\"\n")
        .unwrap_err();
    assert!(matches!(err, BindError::BinaryNotFound { .. }));
}

#[test]
fn test_signature_identifier() {
    static IMAGE: [u8; 8] = [0x90, 0x90, 0x55, 0x8B, 0xEC, 0x83, 0xC3, 0x00];

    let manager = manager();
    let base = NativeAddress::from_ptr(IMAGE.as_ptr());
    manager
        .binaries()
        .register(SymbolTable::new("server").with_image(base, IMAGE.len()));

    let function = manager
        .pipe_function(&PipeFunction::new(
            "server",
            Identifier::parse("[55 8B 2A 83]").unwrap(),
            Signature::new(vec![], None, Convention::Cdecl),
        ))
        .unwrap();
    assert_eq!(function.address(), base + 2);
}

#[test]
fn test_type_document_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entity.toml");
    std::fs::write(&path, "size = 24\n\n[instance_attribute.health]\ntype = \"int\"\noffset = 4\n").unwrap();

    let manager = manager();
    let class = manager.create_type_from_file("Entity", &path, &[]).unwrap();
    assert_eq!(class.size(), Some(24));
    assert!(matches!(
        manager.create_type_from_file("Other", dir.path().join("missing.toml"), &[]),
        Err(BindError::Io(_))
    ));
}

#[cfg(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64"))]
mod calls {
    use super::*;

    extern "C" fn get_health(this: *const u8) -> i32 {
        unsafe { *(this.add(8) as *const i32) }
    }

    extern "C" fn get_double_health(this: *const u8) -> i32 {
        unsafe { *(this.add(8) as *const i32) * 2 }
    }

    extern "C" fn get_origin(this: *mut u8) -> *mut u8 {
        unsafe { this.add(16) }
    }

    extern "C" fn init(this: *mut u8, health: i32) {
        unsafe { *(this.add(8) as *mut i32) = health }
    }

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    const ENTITY: &str = r#"
        binary = "server"
        size = 32
        constructor = "init"

        [instance_attribute.health]
        type = "int"
        offset = 8

        [virtual_function.get_health]
        index = 2
        return_type = "int"

        [virtual_function.get_origin]
        index = 3
        return_type = "Vector"

        [function.init]
        identifier = "Entity_Init"
        args = ["int"]
    "#;

    fn setup() -> Arc<TypeManager> {
        let manager = super::manager();
        manager.binaries().register(
            SymbolTable::new("server")
                .with_symbol("Entity_Init", NativeAddress::new(init as usize))
                .with_symbol("add", NativeAddress::new(add as usize)),
        );
        manager
            .create_type("Vector", TypeDefinition::new().size(12).instance_attribute("x", "float", 0), &[])
            .unwrap();
        manager
    }

    #[test]
    fn test_virtual_function_reads_vtable_each_call() {
        let manager = setup();
        let class = manager.create_type_from_str("Entity", ENTITY, &[]).unwrap();

        let mut vtable = [0usize, 0, get_health as usize, get_origin as usize];
        let mut block = Block::new(4);
        block.storage[0] = vtable.as_ptr() as u64;

        let entity = Instance::wrap(&class, &[Value::Pointer(block.address())]).unwrap();
        entity.set("health", 40).unwrap();
        assert_eq!(entity.call("get_health", &[]).unwrap(), Value::Int(40));

        let method = entity.method("get_health").unwrap();
        assert_eq!(method.receiver(), block.address());

        // Swapping the slot is observed by an existing thunk
        vtable[2] = get_double_health as usize;
        assert_eq!(method.call(&[]).unwrap(), Value::Int(80));

        let origin = entity.call("get_origin", &[]).unwrap();
        let origin = origin.as_object().unwrap();
        assert_eq!(origin.class_name(), "Vector");
        assert_eq!(origin.address(), block.address() + 16);

        assert!(matches!(
            entity.call("get_health", &[Value::Int(1)]),
            Err(BindError::ArgumentCount { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_constructor_member_function() {
        let manager = setup();
        let class = manager.create_type_from_str("Entity", ENTITY, &[]).unwrap();

        let entity = Instance::allocate(&class, &[Value::Int(42)], true).unwrap();
        assert_eq!(entity.get("health").unwrap(), Value::Int(42));
        entity.dealloc().unwrap();
    }

    #[test]
    fn test_pipe_call() {
        let manager = setup();
        let pipe = manager
            .create_pipe_from_str("[add]\nbinary = \"server\"\nidentifier = \"add\"\nargs = \"int, int\"\nreturn_type = \"int\"\n")
            .unwrap();
        assert_eq!(pipe.call("add", &[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_function_typedef() {
        let manager = setup();
        let typedef = manager.function_typedef(
            Signature::new(
                vec![NativeType::Int.into(), NativeType::Int.into()],
                Some(NativeType::Int.into()),
                Convention::Cdecl,
            ),
            None,
        );
        let function = typedef.make_function(NativeAddress::new(add as usize));
        assert_eq!(function.call(&[Value::Int(-4), Value::Int(1)]).unwrap(), Value::Int(-3));
    }
}
