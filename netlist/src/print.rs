use std::fmt;

use crate::{Module, SigBit, SigSpec, State, WireId};

/// Borrowing adapter that renders a spec with the wire names of its module.
/// Whole wires print as their name, slices as `name[hi:lo]`, concatenations
/// MSB-first in braces, constant runs as `<width>'<bits>`.
pub struct SigDisplay<'a> {
    module: &'a Module,
    spec: SigSpec,
}

impl Module {
    pub fn display_sig(&self, spec: &SigSpec) -> SigDisplay<'_> {
        SigDisplay { module: self, spec: spec.clone() }
    }

    pub fn display_bit(&self, bit: SigBit) -> SigDisplay<'_> {
        SigDisplay { module: self, spec: SigSpec::from(bit) }
    }
}

enum Chunk {
    Wire { wire: WireId, start: usize, len: usize },
    Const(Vec<State>),
}

fn chunks(spec: &SigSpec) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for bit in spec.iter() {
        match (bit, chunks.last_mut()) {
            (SigBit::Wire(wire, offset), Some(Chunk::Wire { wire: last, start, len }))
                if *last == wire && offset == *start + *len =>
            {
                *len += 1;
            }
            (SigBit::Wire(wire, offset), _) => {
                chunks.push(Chunk::Wire { wire, start: offset, len: 1 });
            }
            (SigBit::Const(state), Some(Chunk::Const(states))) => {
                states.push(state);
            }
            (SigBit::Const(state), None | Some(Chunk::Wire { .. })) => {
                chunks.push(Chunk::Const(vec![state]));
            }
        }
    }
    chunks
}

impl fmt::Display for SigDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let write_chunk = |f: &mut fmt::Formatter, chunk: &Chunk| -> fmt::Result {
            match chunk {
                Chunk::Wire { wire, start, len } => {
                    let wire = self.module.wire(*wire);
                    if *start == 0 && *len == wire.width() {
                        write!(f, "{}", wire.name())
                    } else if *len == 1 {
                        write!(f, "{}[{}]", wire.name(), start)
                    } else {
                        write!(f, "{}[{}:{}]", wire.name(), start + len - 1, start)
                    }
                }
                Chunk::Const(states) => {
                    write!(f, "{}'", states.len())?;
                    for state in states.iter().rev() {
                        write!(f, "{}", state)?;
                    }
                    Ok(())
                }
            }
        };

        let chunks = chunks(&self.spec);
        match chunks.as_slice() {
            [] => write!(f, "{{}}"),
            [chunk] => write_chunk(f, chunk),
            chunks => {
                write!(f, "{{")?;
                for chunk in chunks.iter().rev() {
                    write!(f, " ")?;
                    write_chunk(f, chunk)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{Module, SigSpec, State};

    #[test]
    fn test_display() {
        let mut module = Module::new("top");
        let a = module.add_wire("a", 2);
        let b = module.add_wire("b", 1);
        let a = module.sig(a);
        let b = module.sig(b);

        assert_eq!(module.display_sig(&a).to_string(), "a");
        assert_eq!(module.display_sig(&a.slice(1..2)).to_string(), "a[1]");

        let mut concat = a.slice(0..1);
        concat.append(&b);
        assert_eq!(module.display_sig(&concat).to_string(), "{ b a[0] }");

        let mut with_const = SigSpec::constant(State::HiZ, 2);
        with_const.append(&a);
        assert_eq!(module.display_sig(&with_const).to_string(), "{ a 2'zz }");

        assert_eq!(module.display_sig(&SigSpec::new()).to_string(), "{}");

        let wide = module.add_wire("w", 4);
        let wide = module.sig(wide);
        assert_eq!(module.display_sig(&wide.slice(1..3)).to_string(), "w[2:1]");
    }
}
