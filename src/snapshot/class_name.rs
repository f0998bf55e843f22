//! Rewrites JVM internal class names into source-style display names.
//!
//! `java/lang/String` → `java.lang.String`, `[Ljava/lang/Object;` →
//! `java.lang.Object []`, `[[I` → `int [][]`. The rewrite is cosmetic: input
//! it does not recognize is passed through with only the package separators
//! changed.

/// Maps a primitive type code to its keyword.
fn primitive_name(code: &str) -> Option<&'static str> {
    Some(match code {
        "B" => "byte",
        "C" => "char",
        "D" => "double",
        "F" => "float",
        "I" => "int",
        "J" => "long",
        "S" => "short",
        "V" => "void",
        "Z" => "boolean",
        _ => return None,
    })
}

/// Converts an internal name or array descriptor into display form.
pub fn to_display_name(internal: &str) -> String {
    let dims = internal.bytes().take_while(|&b| b == b'[').count();
    let element = &internal[dims..];

    let base = match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
        Some(object) => object,
        None if dims > 0 => primitive_name(element).unwrap_or(element),
        None => element,
    };

    let mut display = base.replace('/', ".");
    if dims > 0 {
        display.push(' ');
        display.push_str(&"[]".repeat(dims));
    }
    display
}
