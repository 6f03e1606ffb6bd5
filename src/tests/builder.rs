//! Builds small images in code. Tables are filled in first-use order, so the
//! result is deliberately not in canonical layout.

use crate::dex::annotations::{
    AnnotationItem, AnnotationSet, AnnotationsDirectory, FieldAnnotation, MethodAnnotation, ParameterAnnotation,
    VISIBILITY_RUNTIME,
};
use crate::dex::code::{CatchHandler, CodeItem, DebugInfo, DebugOp, TryItem, TypeAddrPair};
use crate::dex::encoded_values::{AnnotationElement, EncodedAnnotation, EncodedValue};
use crate::dex::model::{
    AccessFlags, ClassData, ClassDef, DexString, EncodedField, EncodedMethod, FieldItem, Image, MethodItem, ProtoItem,
    TypeItem,
};

pub(crate) struct ImageBuilder {
    image: Image,
}

impl ImageBuilder {
    pub fn new() -> ImageBuilder {
        ImageBuilder { image: Image::new(35) }
    }

    pub fn string(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.image.find_string(s) {
            return idx;
        }
        self.image.strings.push(DexString::from_string(s));
        self.image.strings.len() as u32 - 1
    }

    pub fn type_(&mut self, descriptor: &str) -> u32 {
        let descriptor = self.string(descriptor);
        if let Some(idx) = self.image.types.iter().position(|t| t.descriptor == descriptor) {
            return idx as u32;
        }
        self.image.types.push(TypeItem { descriptor });
        self.image.types.len() as u32 - 1
    }

    pub fn proto(&mut self, ret: &str, params: &[&str]) -> u32 {
        let shorty_char = |d: &str| match d.as_bytes()[0] {
            b'[' => 'L',
            c => c as char,
        };
        let shorty: String = std::iter::once(ret).chain(params.iter().copied()).map(shorty_char).collect();
        let shorty = self.string(&shorty);
        let return_type = self.type_(ret);
        let parameters: Vec<u32> = params.iter().map(|p| self.type_(p)).collect();
        let item = ProtoItem { shorty, return_type, parameters };
        if let Some(idx) = self.image.protos.iter().position(|p| *p == item) {
            return idx as u32;
        }
        self.image.protos.push(item);
        self.image.protos.len() as u32 - 1
    }

    pub fn field(&mut self, class: &str, name: &str, type_: &str) -> u32 {
        let item = FieldItem { class: self.type_(class), type_: self.type_(type_), name: self.string(name) };
        if let Some(idx) = self.image.fields.iter().position(|f| *f == item) {
            return idx as u32;
        }
        self.image.fields.push(item);
        self.image.fields.len() as u32 - 1
    }

    pub fn method(&mut self, class: &str, name: &str, ret: &str, params: &[&str]) -> u32 {
        let item = MethodItem { class: self.type_(class), proto: self.proto(ret, params), name: self.string(name) };
        if let Some(idx) = self.image.methods.iter().position(|m| *m == item) {
            return idx as u32;
        }
        self.image.methods.push(item);
        self.image.methods.len() as u32 - 1
    }

    /// Defines a public class extending `superclass` and returns its position.
    pub fn class(&mut self, descriptor: &str, superclass: &str) -> usize {
        let class_type = self.type_(descriptor);
        let superclass = self.type_(superclass);
        let mut class = ClassDef::new(class_type, AccessFlags::PUBLIC, Some(superclass));
        class.class_data = Some(ClassData::default());
        self.image.classes.push(class);
        self.image.classes.len() - 1
    }

    pub fn code(&mut self, registers: u16, ins: u16, outs: u16, insns: Vec<u16>) -> u32 {
        self.image.codes.push(CodeItem::new(registers, ins, outs, insns));
        self.image.codes.len() as u32 - 1
    }

    pub fn direct_method(&mut self, class: usize, method: u32, access_flags: AccessFlags, code: Option<u32>) {
        self.data(class).direct_methods.push(EncodedMethod { method, access_flags, code });
    }

    pub fn virtual_method(&mut self, class: usize, method: u32, access_flags: AccessFlags, code: Option<u32>) {
        self.data(class).virtual_methods.push(EncodedMethod { method, access_flags, code });
    }

    pub fn static_field(&mut self, class: usize, field: u32, value: Option<EncodedValue>) {
        self.data(class).static_fields.push(EncodedField { field, access_flags: AccessFlags::PUBLIC | AccessFlags::STATIC });
        if let Some(value) = value {
            self.image.classes[class].static_values.get_or_insert_with(Vec::new).push(value);
        }
    }

    pub fn instance_field(&mut self, class: usize, field: u32) {
        self.data(class).instance_fields.push(EncodedField { field, access_flags: AccessFlags::PRIVATE });
    }

    /// A runtime-visible annotation with string-valued elements.
    pub fn annotation(&mut self, type_: &str, elements: &[(&str, &str)]) -> AnnotationItem {
        let type_idx = self.type_(type_);
        let elements = elements
            .iter()
            .map(|(name, value)| AnnotationElement {
                name_idx: self.string(name),
                value: EncodedValue::String(self.string(value)),
            })
            .collect();
        AnnotationItem { visibility: VISIBILITY_RUNTIME, annotation: EncodedAnnotation { type_idx, elements } }
    }

    pub fn annotations(&mut self, class: usize) -> &mut AnnotationsDirectory {
        self.image.classes[class].annotations.get_or_insert_with(AnnotationsDirectory::default)
    }

    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    pub fn build(self) -> Image {
        self.image
    }

    fn data(&mut self, class: usize) -> &mut ClassData {
        self.image.classes[class].class_data.get_or_insert_with(ClassData::default)
    }
}

pub(crate) fn return_void() -> Vec<u16> {
    vec![0x000e]
}

/// 21c: `op vAA, kind@BBBB`
fn format_21c(op: u8, reg: u8, index: u32) -> Vec<u16> {
    vec![(reg as u16) << 8 | op as u16, index as u16]
}

pub(crate) fn const_string(reg: u8, string: u32) -> Vec<u16> {
    format_21c(0x1a, reg, string)
}

pub(crate) fn new_instance(reg: u8, type_: u32) -> Vec<u16> {
    format_21c(0x22, reg, type_)
}

pub(crate) fn sget_object(reg: u8, field: u32) -> Vec<u16> {
    format_21c(0x62, reg, field)
}

/// 35c with up to four argument registers.
fn format_35c(op: u8, args: &[u8], method: u32) -> Vec<u16> {
    let mut regs = 0u16;
    for (i, &r) in args.iter().enumerate() {
        regs |= ((r & 0xf) as u16) << (i * 4);
    }
    vec![(args.len() as u16) << 12 | op as u16, method as u16, regs]
}

pub(crate) fn invoke_virtual(args: &[u8], method: u32) -> Vec<u16> {
    format_35c(0x6e, args, method)
}

pub(crate) fn invoke_direct(args: &[u8], method: u32) -> Vec<u16> {
    format_35c(0x70, args, method)
}

/// A small app in package `com/app`:
///
/// ```text
/// Main      <init>, static main() using Helper and the literal "hello",
///           inside a try block catching Exception, with debug info
/// Helper    <init>, greet()V, say(String)V, static TAG = "helper-tag",
///           annotated with @Marker on the class, TAG, greet and say's parameter
/// Unused    <init>, greet()V, int count, the literal "unused-literal"
/// ```
pub(crate) fn sample() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    let object = "Ljava/lang/Object;";
    let string = "Ljava/lang/String;";
    let marker = "Lcom/app/Marker;";
    let object_init = b.method(object, "<init>", "V", &[]);

    let main = b.class("Lcom/app/Main;", object);
    let init = b.method("Lcom/app/Main;", "<init>", "V", &[]);
    let code = b.code(1, 1, 1, [invoke_direct(&[0], object_init), return_void()].concat());
    b.direct_method(main, init, AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR, Some(code));

    let helper_type = b.type_("Lcom/app/Helper;");
    let helper_init = b.method("Lcom/app/Helper;", "<init>", "V", &[]);
    let greet = b.method("Lcom/app/Helper;", "greet", "V", &[]);
    let tag = b.field("Lcom/app/Helper;", "TAG", string);
    let hello = b.string("hello");
    let main_method = b.method("Lcom/app/Main;", "main", "V", &[]);
    let code = b.code(
        2,
        0,
        1,
        [
            new_instance(0, helper_type),
            invoke_direct(&[0], helper_init),
            const_string(1, hello),
            sget_object(1, tag),
            invoke_virtual(&[0], greet),
            return_void(),
        ]
        .concat(),
    );
    b.direct_method(main, main_method, AccessFlags::PUBLIC | AccessFlags::STATIC, Some(code));
    // everything before the return-void at 12 is guarded
    let exception = b.type_("Ljava/lang/Exception;");
    let local_name = b.string("greeter");
    let main_code = &mut b.image_mut().codes[code as usize];
    main_code.tries = vec![TryItem { start_addr: 0, insn_count: 12, handler: 0 }];
    main_code.handlers = vec![CatchHandler { pairs: vec![TypeAddrPair { type_idx: exception, addr: 12 }], catch_all: None }];
    main_code.debug_info = Some(DebugInfo {
        line_start: 10,
        parameter_names: vec![],
        ops: vec![
            DebugOp::SetPrologueEnd,
            DebugOp::AdvancePc(2),
            DebugOp::StartLocal { register: 0, name: Some(local_name), type_: Some(helper_type) },
            DebugOp::AdvanceLine(1),
            DebugOp::AdvancePc(10),
        ],
    });

    let helper = b.class("Lcom/app/Helper;", object);
    let code = b.code(1, 1, 1, [invoke_direct(&[0], object_init), return_void()].concat());
    b.direct_method(helper, helper_init, AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR, Some(code));
    let code = b.code(1, 1, 0, return_void());
    b.virtual_method(helper, greet, AccessFlags::PUBLIC, Some(code));
    let say = b.method("Lcom/app/Helper;", "say", "V", &[string]);
    let message = b.string("message");
    let code = b.code(2, 2, 0, return_void());
    b.image_mut().codes[code as usize].debug_info =
        Some(DebugInfo { line_start: 20, parameter_names: vec![Some(message)], ops: vec![] });
    b.virtual_method(helper, say, AccessFlags::PUBLIC, Some(code));
    let tag_value = b.string("helper-tag");
    b.static_field(helper, tag, Some(EncodedValue::String(tag_value)));

    let on_class = b.annotation(marker, &[("name", "helper-marker")]);
    let on_field = b.annotation(marker, &[]);
    let on_method = b.annotation(marker, &[("name", "greet-marker")]);
    let on_parameter = b.annotation(marker, &[]);
    let dir = b.annotations(helper);
    dir.class_annotations = Some(AnnotationSet { items: vec![on_class] });
    dir.fields.push(FieldAnnotation { field: tag, annotations: AnnotationSet { items: vec![on_field] } });
    dir.methods.push(MethodAnnotation { method: greet, annotations: AnnotationSet { items: vec![on_method] } });
    dir.parameters.push(ParameterAnnotation {
        method: say,
        parameters: vec![Some(AnnotationSet { items: vec![on_parameter] })],
    });

    let unused = b.class("Lcom/app/Unused;", object);
    let unused_init = b.method("Lcom/app/Unused;", "<init>", "V", &[]);
    let code = b.code(1, 1, 1, [invoke_direct(&[0], object_init), return_void()].concat());
    b.direct_method(unused, unused_init, AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR, Some(code));
    let unused_greet = b.method("Lcom/app/Unused;", "greet", "V", &[]);
    let literal = b.string("unused-literal");
    let code = b.code(1, 1, 0, [const_string(0, literal), return_void()].concat());
    b.virtual_method(unused, unused_greet, AccessFlags::PUBLIC, Some(code));
    let count = b.field("Lcom/app/Unused;", "count", "I");
    b.instance_field(unused, count);
    b
}
