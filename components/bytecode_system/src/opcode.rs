//! Bytecode opcodes
//!
//! The full CLDC/JVM instruction set plus one internal opcode produced by
//! the linker ([`Opcode::ReturnInPlace`]).

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $byte:literal => $mnemonic:literal, )*) => {
        /// Bytecode opcodes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $byte, )*
        }

        impl Opcode {
            /// Decodes an opcode byte
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $( $byte => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            /// Lower-case assembler mnemonic
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }
        }
    };
}

opcodes! {
    /// Do nothing
    Nop = 0x00 => "nop",
    /// Push null
    AconstNull = 0x01 => "aconst_null",
    /// Push int -1
    IconstM1 = 0x02 => "iconst_m1",
    /// Push int 0
    Iconst0 = 0x03 => "iconst_0",
    /// Push int 1
    Iconst1 = 0x04 => "iconst_1",
    /// Push int 2
    Iconst2 = 0x05 => "iconst_2",
    /// Push int 3
    Iconst3 = 0x06 => "iconst_3",
    /// Push int 4
    Iconst4 = 0x07 => "iconst_4",
    /// Push int 5
    Iconst5 = 0x08 => "iconst_5",
    /// Push long 0
    Lconst0 = 0x09 => "lconst_0",
    /// Push long 1
    Lconst1 = 0x0a => "lconst_1",
    /// Push float 0
    Fconst0 = 0x0b => "fconst_0",
    /// Push float 1
    Fconst1 = 0x0c => "fconst_1",
    /// Push float 2
    Fconst2 = 0x0d => "fconst_2",
    /// Push double 0
    Dconst0 = 0x0e => "dconst_0",
    /// Push double 1
    Dconst1 = 0x0f => "dconst_1",
    /// Push sign-extended byte
    Bipush = 0x10 => "bipush",
    /// Push sign-extended short
    Sipush = 0x11 => "sipush",
    /// Push constant (narrow index)
    Ldc = 0x12 => "ldc",
    /// Push constant (wide index)
    LdcW = 0x13 => "ldc_w",
    /// Push long or double constant
    Ldc2W = 0x14 => "ldc2_w",
    /// Load int local
    Iload = 0x15 => "iload",
    /// Load long local
    Lload = 0x16 => "lload",
    /// Load float local
    Fload = 0x17 => "fload",
    /// Load double local
    Dload = 0x18 => "dload",
    /// Load reference local
    Aload = 0x19 => "aload",
    /// Load int local 0
    Iload0 = 0x1a => "iload_0",
    /// Load int local 1
    Iload1 = 0x1b => "iload_1",
    /// Load int local 2
    Iload2 = 0x1c => "iload_2",
    /// Load int local 3
    Iload3 = 0x1d => "iload_3",
    /// Load long local 0
    Lload0 = 0x1e => "lload_0",
    /// Load long local 1
    Lload1 = 0x1f => "lload_1",
    /// Load long local 2
    Lload2 = 0x20 => "lload_2",
    /// Load long local 3
    Lload3 = 0x21 => "lload_3",
    /// Load float local 0
    Fload0 = 0x22 => "fload_0",
    /// Load float local 1
    Fload1 = 0x23 => "fload_1",
    /// Load float local 2
    Fload2 = 0x24 => "fload_2",
    /// Load float local 3
    Fload3 = 0x25 => "fload_3",
    /// Load double local 0
    Dload0 = 0x26 => "dload_0",
    /// Load double local 1
    Dload1 = 0x27 => "dload_1",
    /// Load double local 2
    Dload2 = 0x28 => "dload_2",
    /// Load double local 3
    Dload3 = 0x29 => "dload_3",
    /// Load reference local 0
    Aload0 = 0x2a => "aload_0",
    /// Load reference local 1
    Aload1 = 0x2b => "aload_1",
    /// Load reference local 2
    Aload2 = 0x2c => "aload_2",
    /// Load reference local 3
    Aload3 = 0x2d => "aload_3",
    /// Load int array element
    Iaload = 0x2e => "iaload",
    /// Load long array element
    Laload = 0x2f => "laload",
    /// Load float array element
    Faload = 0x30 => "faload",
    /// Load double array element
    Daload = 0x31 => "daload",
    /// Load reference array element
    Aaload = 0x32 => "aaload",
    /// Load byte or boolean array element
    Baload = 0x33 => "baload",
    /// Load char array element
    Caload = 0x34 => "caload",
    /// Load short array element
    Saload = 0x35 => "saload",
    /// Store int local
    Istore = 0x36 => "istore",
    /// Store long local
    Lstore = 0x37 => "lstore",
    /// Store float local
    Fstore = 0x38 => "fstore",
    /// Store double local
    Dstore = 0x39 => "dstore",
    /// Store reference local
    Astore = 0x3a => "astore",
    /// Store int local 0
    Istore0 = 0x3b => "istore_0",
    /// Store int local 1
    Istore1 = 0x3c => "istore_1",
    /// Store int local 2
    Istore2 = 0x3d => "istore_2",
    /// Store int local 3
    Istore3 = 0x3e => "istore_3",
    /// Store long local 0
    Lstore0 = 0x3f => "lstore_0",
    /// Store long local 1
    Lstore1 = 0x40 => "lstore_1",
    /// Store long local 2
    Lstore2 = 0x41 => "lstore_2",
    /// Store long local 3
    Lstore3 = 0x42 => "lstore_3",
    /// Store float local 0
    Fstore0 = 0x43 => "fstore_0",
    /// Store float local 1
    Fstore1 = 0x44 => "fstore_1",
    /// Store float local 2
    Fstore2 = 0x45 => "fstore_2",
    /// Store float local 3
    Fstore3 = 0x46 => "fstore_3",
    /// Store double local 0
    Dstore0 = 0x47 => "dstore_0",
    /// Store double local 1
    Dstore1 = 0x48 => "dstore_1",
    /// Store double local 2
    Dstore2 = 0x49 => "dstore_2",
    /// Store double local 3
    Dstore3 = 0x4a => "dstore_3",
    /// Store reference local 0
    Astore0 = 0x4b => "astore_0",
    /// Store reference local 1
    Astore1 = 0x4c => "astore_1",
    /// Store reference local 2
    Astore2 = 0x4d => "astore_2",
    /// Store reference local 3
    Astore3 = 0x4e => "astore_3",
    /// Store int array element
    Iastore = 0x4f => "iastore",
    /// Store long array element
    Lastore = 0x50 => "lastore",
    /// Store float array element
    Fastore = 0x51 => "fastore",
    /// Store double array element
    Dastore = 0x52 => "dastore",
    /// Store reference array element
    Aastore = 0x53 => "aastore",
    /// Store byte or boolean array element
    Bastore = 0x54 => "bastore",
    /// Store char array element
    Castore = 0x55 => "castore",
    /// Store short array element
    Sastore = 0x56 => "sastore",
    /// Discard one category-1 value
    Pop = 0x57 => "pop",
    /// Discard one category-2 or two category-1 values
    Pop2 = 0x58 => "pop2",
    /// Duplicate top value
    Dup = 0x59 => "dup",
    /// Duplicate top value beneath the second
    DupX1 = 0x5a => "dup_x1",
    /// Duplicate top value two or three values down
    DupX2 = 0x5b => "dup_x2",
    /// Duplicate top one or two values
    Dup2 = 0x5c => "dup2",
    /// Duplicate top one or two values beneath the next
    Dup2X1 = 0x5d => "dup2_x1",
    /// Duplicate top one or two values further down
    Dup2X2 = 0x5e => "dup2_x2",
    /// Swap top two category-1 values
    Swap = 0x5f => "swap",
    /// Add ints
    Iadd = 0x60 => "iadd",
    /// Add longs
    Ladd = 0x61 => "ladd",
    /// Add floats
    Fadd = 0x62 => "fadd",
    /// Add doubles
    Dadd = 0x63 => "dadd",
    /// Subtract ints
    Isub = 0x64 => "isub",
    /// Subtract longs
    Lsub = 0x65 => "lsub",
    /// Subtract floats
    Fsub = 0x66 => "fsub",
    /// Subtract doubles
    Dsub = 0x67 => "dsub",
    /// Multiply ints
    Imul = 0x68 => "imul",
    /// Multiply longs
    Lmul = 0x69 => "lmul",
    /// Multiply floats
    Fmul = 0x6a => "fmul",
    /// Multiply doubles
    Dmul = 0x6b => "dmul",
    /// Divide ints
    Idiv = 0x6c => "idiv",
    /// Divide longs
    Ldiv = 0x6d => "ldiv",
    /// Divide floats
    Fdiv = 0x6e => "fdiv",
    /// Divide doubles
    Ddiv = 0x6f => "ddiv",
    /// Int remainder
    Irem = 0x70 => "irem",
    /// Long remainder
    Lrem = 0x71 => "lrem",
    /// Float remainder
    Frem = 0x72 => "frem",
    /// Double remainder
    Drem = 0x73 => "drem",
    /// Negate int
    Ineg = 0x74 => "ineg",
    /// Negate long
    Lneg = 0x75 => "lneg",
    /// Negate float
    Fneg = 0x76 => "fneg",
    /// Negate double
    Dneg = 0x77 => "dneg",
    /// Shift int left
    Ishl = 0x78 => "ishl",
    /// Shift long left
    Lshl = 0x79 => "lshl",
    /// Arithmetic shift int right
    Ishr = 0x7a => "ishr",
    /// Arithmetic shift long right
    Lshr = 0x7b => "lshr",
    /// Logical shift int right
    Iushr = 0x7c => "iushr",
    /// Logical shift long right
    Lushr = 0x7d => "lushr",
    /// Bitwise and of ints
    Iand = 0x7e => "iand",
    /// Bitwise and of longs
    Land = 0x7f => "land",
    /// Bitwise or of ints
    Ior = 0x80 => "ior",
    /// Bitwise or of longs
    Lor = 0x81 => "lor",
    /// Bitwise xor of ints
    Ixor = 0x82 => "ixor",
    /// Bitwise xor of longs
    Lxor = 0x83 => "lxor",
    /// Increment int local by constant
    Iinc = 0x84 => "iinc",
    /// Int to long
    I2l = 0x85 => "i2l",
    /// Int to float
    I2f = 0x86 => "i2f",
    /// Int to double
    I2d = 0x87 => "i2d",
    /// Long to int
    L2i = 0x88 => "l2i",
    /// Long to float
    L2f = 0x89 => "l2f",
    /// Long to double
    L2d = 0x8a => "l2d",
    /// Float to int
    F2i = 0x8b => "f2i",
    /// Float to long
    F2l = 0x8c => "f2l",
    /// Float to double
    F2d = 0x8d => "f2d",
    /// Double to int
    D2i = 0x8e => "d2i",
    /// Double to long
    D2l = 0x8f => "d2l",
    /// Double to float
    D2f = 0x90 => "d2f",
    /// Int to byte
    I2b = 0x91 => "i2b",
    /// Int to char
    I2c = 0x92 => "i2c",
    /// Int to short
    I2s = 0x93 => "i2s",
    /// Compare longs
    Lcmp = 0x94 => "lcmp",
    /// Compare floats, NaN gives -1
    Fcmpl = 0x95 => "fcmpl",
    /// Compare floats, NaN gives 1
    Fcmpg = 0x96 => "fcmpg",
    /// Compare doubles, NaN gives -1
    Dcmpl = 0x97 => "dcmpl",
    /// Compare doubles, NaN gives 1
    Dcmpg = 0x98 => "dcmpg",
    /// Branch if int is zero
    Ifeq = 0x99 => "ifeq",
    /// Branch if int is non-zero
    Ifne = 0x9a => "ifne",
    /// Branch if int is negative
    Iflt = 0x9b => "iflt",
    /// Branch if int is non-negative
    Ifge = 0x9c => "ifge",
    /// Branch if int is positive
    Ifgt = 0x9d => "ifgt",
    /// Branch if int is non-positive
    Ifle = 0x9e => "ifle",
    /// Branch if ints are equal
    IfIcmpeq = 0x9f => "if_icmpeq",
    /// Branch if ints differ
    IfIcmpne = 0xa0 => "if_icmpne",
    /// Branch if int less than
    IfIcmplt = 0xa1 => "if_icmplt",
    /// Branch if int greater or equal
    IfIcmpge = 0xa2 => "if_icmpge",
    /// Branch if int greater than
    IfIcmpgt = 0xa3 => "if_icmpgt",
    /// Branch if int less or equal
    IfIcmple = 0xa4 => "if_icmple",
    /// Branch if references are equal
    IfAcmpeq = 0xa5 => "if_acmpeq",
    /// Branch if references differ
    IfAcmpne = 0xa6 => "if_acmpne",
    /// Unconditional branch
    Goto = 0xa7 => "goto",
    /// Jump subroutine
    Jsr = 0xa8 => "jsr",
    /// Return from subroutine
    Ret = 0xa9 => "ret",
    /// Indexed jump table
    Tableswitch = 0xaa => "tableswitch",
    /// Keyed jump table
    Lookupswitch = 0xab => "lookupswitch",
    /// Return int
    Ireturn = 0xac => "ireturn",
    /// Return long
    Lreturn = 0xad => "lreturn",
    /// Return float
    Freturn = 0xae => "freturn",
    /// Return double
    Dreturn = 0xaf => "dreturn",
    /// Return reference
    Areturn = 0xb0 => "areturn",
    /// Return void
    Return = 0xb1 => "return",
    /// Read static field
    Getstatic = 0xb2 => "getstatic",
    /// Write static field
    Putstatic = 0xb3 => "putstatic",
    /// Read instance field
    Getfield = 0xb4 => "getfield",
    /// Write instance field
    Putfield = 0xb5 => "putfield",
    /// Dynamically dispatched call
    Invokevirtual = 0xb6 => "invokevirtual",
    /// Constructor, private or super call
    Invokespecial = 0xb7 => "invokespecial",
    /// Static call
    Invokestatic = 0xb8 => "invokestatic",
    /// Interface call
    Invokeinterface = 0xb9 => "invokeinterface",
    /// Bootstrap-method call (not part of CLDC)
    Invokedynamic = 0xba => "invokedynamic",
    /// Allocate instance
    New = 0xbb => "new",
    /// Allocate primitive array
    Newarray = 0xbc => "newarray",
    /// Allocate reference array
    Anewarray = 0xbd => "anewarray",
    /// Array length
    Arraylength = 0xbe => "arraylength",
    /// Throw exception
    Athrow = 0xbf => "athrow",
    /// Checked cast
    Checkcast = 0xc0 => "checkcast",
    /// Type test
    Instanceof = 0xc1 => "instanceof",
    /// Enter monitor
    Monitorenter = 0xc2 => "monitorenter",
    /// Exit monitor
    Monitorexit = 0xc3 => "monitorexit",
    /// Widen the next instruction's local index
    Wide = 0xc4 => "wide",
    /// Allocate multi-dimensional array
    Multianewarray = 0xc5 => "multianewarray",
    /// Branch if null
    Ifnull = 0xc6 => "ifnull",
    /// Branch if not null
    Ifnonnull = 0xc7 => "ifnonnull",
    /// Unconditional branch, 32-bit offset
    GotoW = 0xc8 => "goto_w",
    /// Jump subroutine, 32-bit offset
    JsrW = 0xc9 => "jsr_w",
    /// Linker-internal: return from a static initializer by popping only
    /// the current frame
    ReturnInPlace = 0xcb => "return_in_place",
}

impl Opcode {
    /// Raw opcode byte
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Check if this opcode ends a method (any return or athrow)
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Ireturn
                | Opcode::Lreturn
                | Opcode::Freturn
                | Opcode::Dreturn
                | Opcode::Areturn
                | Opcode::Return
                | Opcode::ReturnInPlace
                | Opcode::Athrow
        )
    }

    /// Check if this opcode carries a 16-bit relative branch offset
    pub fn is_short_branch(self) -> bool {
        matches!(
            self,
            Opcode::Ifeq
                | Opcode::Ifne
                | Opcode::Iflt
                | Opcode::Ifge
                | Opcode::Ifgt
                | Opcode::Ifle
                | Opcode::IfIcmpeq
                | Opcode::IfIcmpne
                | Opcode::IfIcmplt
                | Opcode::IfIcmpge
                | Opcode::IfIcmpgt
                | Opcode::IfIcmple
                | Opcode::IfAcmpeq
                | Opcode::IfAcmpne
                | Opcode::Goto
                | Opcode::Jsr
                | Opcode::Ifnull
                | Opcode::Ifnonnull
        )
    }

    /// Check if this opcode reads or writes a field
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield
        )
    }

    /// Number of fixed operand bytes following the opcode, or `None` for
    /// the variable-length switches and `wide`.
    pub fn operand_width(self) -> Option<usize> {
        use Opcode::*;
        let width = match self {
            Bipush | Ldc | Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore
            | Dstore | Astore | Ret | Newarray => 1,
            Sipush | LdcW | Ldc2W | Getstatic | Putstatic | Getfield | Putfield
            | Invokevirtual | Invokespecial | Invokestatic | New | Anewarray | Checkcast
            | Instanceof | Iinc => 2,
            Multianewarray => 3,
            Invokeinterface | Invokedynamic | GotoW | JsrW => 4,
            Tableswitch | Lookupswitch | Wide => return None,
            op if op.is_short_branch() => 2,
            _ => 0,
        };
        Some(width)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::from_byte(byte).ok_or(byte)
    }
}
