use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use tracing::debug;

/* =========================
   UDFs (funciones de usuario)
   ========================= */

/// UDFs de map registradas: línea -> línea transformada.
pub fn map_udf(name: &str) -> Option<fn(&str) -> String> {
    match name {
        "to_lower" => Some(|s| s.to_lowercase()),
        "to_json" => Some(|s| {
            // Convierte CSV "clave,valor" a JSON {"key": "...", "value": "..."}
            match s.split_once(',') {
                Some((k, v)) => format!(
                    r#"{{"key": "{}", "value": "{}"}}"#,
                    k.trim(),
                    v.trim()
                ),
                None => "{}".to_string(),
            }
        }),
        _ => None,
    }
}

/// UDFs de filter registradas: línea -> pasa o no.
pub fn filter_udf(name: &str) -> Option<fn(&str) -> bool> {
    match name {
        "long_words" => Some(|s| s.len() > 4),
        _ => None,
    }
}

/// UDFs de flat_map registradas: línea -> 0+ líneas.
pub fn flat_map_udf(name: &str) -> Option<fn(&str) -> Vec<String>> {
    match name {
        "tokenize" => Some(|s| {
            // Eliminar puntuación y dividir en palabras
            s.chars()
                .filter(|c| !".,;?!-".contains(*c))
                .collect::<String>()
                .split_whitespace()
                .map(|w| w.to_string())
                .collect()
        }),
        _ => None,
    }
}

const DEFAULT_SPILL_THRESHOLD: usize = 1000;

/// Umbral de claves distintas en memoria durante reduce_by_key.
/// Se puede sobreescribir con la env var SPILL_THRESHOLD.
pub fn spill_threshold() -> usize {
    std::env::var("SPILL_THRESHOLD")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_SPILL_THRESHOLD)
}

fn fn_not_found(kind: &str, name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("fn {kind} no encontrada: {name}"),
    )
}

fn create_output(path: &str) -> io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(BufWriter::new(File::create(path)?))
}

/* =========================
   Operadores core
   ========================= */

/// Nodo source (read_csv / read_jsonl): copia el archivo de entrada
/// línea por línea, sin parsear ni validar.
pub fn copy_source(input_path: &str, output_path: &str) -> io::Result<()> {
    let file = File::open(input_path)?;
    let reader = BufReader::new(file);
    let mut writer = create_output(output_path)?;

    for line in reader.lines() {
        writeln!(writer, "{}", line?)?;
    }
    writer.flush()
}

/// map: aplica la UDF `fn_name` a cada línea de cada entrada.
/// Entradas que no se pueden abrir se saltan; la salida se crea igual.
pub fn map_lines(inputs: &[String], output: &str, fn_name: &str) -> io::Result<()> {
    let f = map_udf(fn_name).ok_or_else(|| fn_not_found("map", fn_name))?;
    let mut writer = create_output(output)?;

    for input in inputs {
        let Ok(file) = File::open(input) else {
            continue;
        };
        for line in BufReader::new(file).lines() {
            writeln!(writer, "{}", f(&line?))?;
        }
    }
    writer.flush()
}

/// flat_map: cada línea puede generar cero, una o muchas líneas de salida.
pub fn flat_map_lines(inputs: &[String], output: &str, fn_name: &str) -> io::Result<()> {
    let f = flat_map_udf(fn_name).ok_or_else(|| fn_not_found("flat_map", fn_name))?;
    let mut writer = create_output(output)?;

    for input in inputs {
        let Ok(file) = File::open(input) else {
            continue;
        };
        for line in BufReader::new(file).lines() {
            for item in f(&line?) {
                writeln!(writer, "{item}")?;
            }
        }
    }
    writer.flush()
}

/// filter: deja pasar sólo las líneas que cumplan el predicado `fn_name`.
pub fn filter_lines(inputs: &[String], output: &str, fn_name: &str) -> io::Result<()> {
    let f = filter_udf(fn_name).ok_or_else(|| fn_not_found("filter", fn_name))?;
    let mut writer = create_output(output)?;

    for input in inputs {
        let Ok(file) = File::open(input) else {
            continue;
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if f(&line) {
                writeln!(writer, "{line}")?;
            }
        }
    }
    writer.flush()
}

/* =========================
   Reduce con spill a disco
   ========================= */

/// Acumulador clave→conteo con spill a disco cuando el mapa crece demasiado.
/// La línea completa es la clave; cada ocurrencia aporta 1.
struct SpillingCounter {
    counts: HashMap<String, u64>,
    spill_files: Vec<String>,
    output_base: String,
    threshold: usize,
}

impl SpillingCounter {
    fn new(output_base: &str, threshold: usize) -> Self {
        Self {
            counts: HashMap::new(),
            spill_files: Vec::new(),
            output_base: output_base.to_string(),
            threshold: threshold.max(1),
        }
    }

    fn add(&mut self, key: &str) -> io::Result<()> {
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
        if self.counts.len() >= self.threshold {
            self.spill_one()?;
        }
        Ok(())
    }

    /// Vuelca el mapa actual a un archivo "clave,conteo" y lo limpia.
    fn spill_one(&mut self) -> io::Result<()> {
        if self.counts.is_empty() {
            return Ok(());
        }

        let path = format!("{}_spill_{}.tmp", self.output_base, self.spill_files.len());
        let mut writer = BufWriter::new(File::create(&path)?);
        for (k, v) in self.counts.drain() {
            writeln!(writer, "{k},{v}")?;
        }
        writer.flush()?;

        debug!(spill = %path, "spill a disco");
        self.spill_files.push(path);
        Ok(())
    }

    /// Reabsorbe los spills por suma y escribe el resultado final
    /// como líneas "clave, conteo". Cada spill se borra tras plegarlo.
    fn finalize(mut self, output_path: &str) -> io::Result<()> {
        for spill in &self.spill_files {
            let file = File::open(spill)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if let Some((k, v)) = line.rsplit_once(',') {
                    let val: u64 = v.parse().unwrap_or(0);
                    *self.counts.entry(k.to_string()).or_insert(0) += val;
                }
            }
            fs::remove_file(spill)?;
        }

        let mut writer = create_output(output_path)?;
        for (k, v) in &self.counts {
            writeln!(writer, "{k}, {v}")?;
        }
        writer.flush()
    }
}

/// reduce_by_key: conteo de ocurrencias por línea con memoria acotada.
/// Fase 1 acumula y hace spill al superar `threshold` claves distintas;
/// fase 2 pliega los spills de vuelta; fase 3 escribe la salida.
pub fn reduce_by_key(inputs: &[String], output: &str, threshold: usize) -> io::Result<()> {
    let mut counter = SpillingCounter::new(output, threshold);

    for input in inputs {
        let Ok(file) = File::open(input) else {
            continue;
        };
        for line in BufReader::new(file).lines() {
            counter.add(&line?)?;
        }
    }

    counter.finalize(output)
}

/* =========================
   Join (hash join interno)
   ========================= */

/// Inner join por la clave antes de la primera coma de cada línea.
/// El lado izquierdo se materializa completo en un mapa; el derecho se
/// recorre en streaming. Salida: "clave, resto_izq, resto_der".
pub fn join(left_file: &str, right_file: &str, output: &str) -> io::Result<()> {
    let mut left_map: HashMap<String, String> = HashMap::new();
    let lfile = File::open(left_file)?;
    for line in BufReader::new(lfile).lines() {
        let line = line?;
        if let Some((k, v)) = line.split_once(',') {
            left_map.insert(k.to_string(), v.to_string());
        }
    }

    let rfile = File::open(right_file)?;
    let mut writer = create_output(output)?;

    for line in BufReader::new(rfile).lines() {
        let line = line?;
        if let Some((k, right_val)) = line.split_once(',') {
            if let Some(left_val) = left_map.get(k) {
                writeln!(writer, "{k}, {left_val}, {right_val}")?;
            }
        }
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("engine_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    fn read_sorted_lines(path: &str) -> Vec<String> {
        let content = fs::read_to_string(path).unwrap();
        let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        lines.sort();
        lines
    }

    /* ============
       UDFs
       ============ */

    #[test]
    fn to_lower_convierte_a_minusculas() {
        let f = map_udf("to_lower").unwrap();
        assert_eq!(f("Hola MUNDO"), "hola mundo");
        assert_eq!(f("Go 1.22 Rocks!"), "go 1.22 rocks!");
    }

    #[test]
    fn to_json_convierte_csv_y_tolera_lineas_malformadas() {
        let f = map_udf("to_json").unwrap();
        assert_eq!(f("1,Carlos"), r#"{"key": "1", "value": "Carlos"}"#);
        // sin coma devuelve objeto vacío
        assert_eq!(f("LineaSinComa"), "{}");
    }

    #[test]
    fn long_words_filtra_por_longitud() {
        let f = filter_udf("long_words").unwrap();
        assert!(f("mundo"));
        assert!(!f("hola")); // 4 caracteres, la condición es > 4
    }

    #[test]
    fn tokenize_elimina_puntuacion_y_separa() {
        let f = flat_map_udf("tokenize").unwrap();
        assert_eq!(f("hola, mundo!"), vec!["hola", "mundo"]);
        assert!(f("").is_empty());
    }

    #[test]
    fn udf_desconocida_retorna_none() {
        assert!(map_udf("inexistente").is_none());
        assert!(filter_udf("inexistente").is_none());
        assert!(flat_map_udf("inexistente").is_none());
    }

    /* ============
       OPERADORES
       ============ */

    #[test]
    fn copy_source_preserva_el_contenido() {
        let tmp = temp_dir("copy");
        let input = write_file(&tmp, "in.csv", "line1\nline2\nline3\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        copy_source(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "line1\nline2\nline3\n");
    }

    #[test]
    fn copy_source_con_entrada_vacia_crea_salida_vacia() {
        let tmp = temp_dir("copy_empty");
        let input = write_file(&tmp, "in.csv", "");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        copy_source(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[test]
    fn map_lines_aplica_la_udf_a_cada_linea() {
        let tmp = temp_dir("map");
        let input = write_file(&tmp, "in.txt", "HOLA\nMundo\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        map_lines(&[input], &output, "to_lower").unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "hola\nmundo\n");
    }

    #[test]
    fn map_lines_con_udf_desconocida_falla() {
        let tmp = temp_dir("map_bad_fn");
        let input = write_file(&tmp, "in.txt", "hola\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        let err = map_lines(&[input], &output, "inexistente").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn map_lines_concatena_varias_entradas_en_orden() {
        let tmp = temp_dir("map_multi");
        let a = write_file(&tmp, "a.txt", "UNO\n");
        let b = write_file(&tmp, "b.txt", "DOS\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        map_lines(&[a, b], &output, "to_lower").unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "uno\ndos\n");
    }

    #[test]
    fn flat_map_lines_expande_cada_linea() {
        let tmp = temp_dir("flat_map");
        let input = write_file(&tmp, "in.txt", "hola mundo\n-\nsolo\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        flat_map_lines(&[input], &output, "tokenize").unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "hola\nmundo\nsolo\n");
    }

    #[test]
    fn filter_lines_descarta_lo_que_no_pasa() {
        let tmp = temp_dir("filter");
        let input = write_file(&tmp, "in.txt", "hola\nmundo\nes\ngenial\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        filter_lines(&[input], &output, "long_words").unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "mundo\ngenial\n");
    }

    #[test]
    fn filter_lines_puede_dejar_salida_vacia() {
        let tmp = temp_dir("filter_empty");
        let input = write_file(&tmp, "in.txt", "no\nsi\nmal\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        filter_lines(&[input], &output, "long_words").unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    /* ============
       REDUCE / SPILL
       ============ */

    #[test]
    fn reduce_by_key_cuenta_ocurrencias() {
        let tmp = temp_dir("reduce");
        let input = write_file(&tmp, "in.txt", "apple\nbanana\napple\napple\nbanana\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        reduce_by_key(&[input], &output, 1000).unwrap();

        assert_eq!(read_sorted_lines(&output), vec!["apple, 3", "banana, 2"]);
    }

    #[test]
    fn reduce_by_key_con_entrada_vacia_crea_salida_vacia() {
        let tmp = temp_dir("reduce_empty");
        let input = write_file(&tmp, "in.txt", "");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        reduce_by_key(&[input], &output, 1000).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[test]
    fn reduce_by_key_es_independiente_del_orden_de_entrada() {
        let tmp = temp_dir("reduce_order");
        let a = write_file(&tmp, "a.txt", "x\ny\nx\nz\n");
        let b = write_file(&tmp, "b.txt", "z\nx\ny\nx\n");
        let out_a = tmp.join("out_a.txt").to_string_lossy().to_string();
        let out_b = tmp.join("out_b.txt").to_string_lossy().to_string();

        reduce_by_key(&[a], &out_a, 1000).unwrap();
        reduce_by_key(&[b], &out_b, 1000).unwrap();

        assert_eq!(read_sorted_lines(&out_a), read_sorted_lines(&out_b));
    }

    #[test]
    fn reduce_by_key_da_lo_mismo_con_y_sin_spill() {
        let tmp = temp_dir("reduce_spill");
        let content = "uno\ndos\ntres\nuno\ndos\nuno\ncuatro\n";
        let input = write_file(&tmp, "in.txt", content);
        let out_spill = tmp.join("out_spill.txt").to_string_lossy().to_string();
        let out_mem = tmp.join("out_mem.txt").to_string_lossy().to_string();

        // threshold 1 fuerza spill en cada clave nueva
        reduce_by_key(&[input.clone()], &out_spill, 1).unwrap();
        reduce_by_key(&[input], &out_mem, usize::MAX).unwrap();

        assert_eq!(read_sorted_lines(&out_spill), read_sorted_lines(&out_mem));
        assert_eq!(
            read_sorted_lines(&out_mem),
            vec!["cuatro, 1", "dos, 2", "tres, 1", "uno, 3"]
        );
    }

    #[test]
    fn reduce_by_key_borra_los_spills_despues_de_plegarlos() {
        let tmp = temp_dir("reduce_cleanup");
        let input = write_file(&tmp, "in.txt", "a\nb\nc\nd\na\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        reduce_by_key(&[input], &output, 2).unwrap();

        let leftovers: Vec<_> = fs::read_dir(&tmp)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(
            read_sorted_lines(&output),
            vec!["a, 2", "b, 1", "c, 1", "d, 1"]
        );
    }

    #[test]
    fn spilling_counter_pliega_spill_y_memoria() {
        let tmp = temp_dir("spill_counter");
        let base = tmp.join("out.txt").to_string_lossy().to_string();

        // threshold = 2 => al ver la segunda clave distinta se hace spill
        let mut counter = SpillingCounter::new(&base, 2);
        counter.add("a").unwrap(); // mapa: {a:1}
        counter.add("b").unwrap(); // alcanza threshold => spill; mapa limpio
        counter.add("a").unwrap(); // mapa: {a:1}
        counter.add("a").unwrap(); // mapa: {a:2}

        counter.finalize(&base).unwrap();

        // de spill: a:1, b:1; de memoria: a:2 => a:3, b:1
        assert_eq!(read_sorted_lines(&base), vec!["a, 3", "b, 1"]);
    }

    /* ============
       JOIN
       ============ */

    #[test]
    fn join_interno_solo_emite_claves_con_match() {
        let tmp = temp_dir("join");
        let left = write_file(&tmp, "left.csv", "1,Carlos\n2,Maria\n3,Juan\n");
        let right = write_file(&tmp, "right.csv", "1,IT\n2,HR\n4,Sales\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        join(&left, &right, &output).unwrap();

        let lines = read_sorted_lines(&output);
        assert_eq!(lines, vec!["1, Carlos, IT", "2, Maria, HR"]);
        let content = fs::read_to_string(&output).unwrap();
        assert!(!content.contains("Juan"));
        assert!(!content.contains("Sales"));
    }

    #[test]
    fn join_ignora_lineas_sin_coma() {
        let tmp = temp_dir("join_malformed");
        let left = write_file(&tmp, "left.csv", "1,Carlos\nbasura\n");
        let right = write_file(&tmp, "right.csv", "1,IT\notrabasura\n");
        let output = tmp.join("out.txt").to_string_lossy().to_string();

        join(&left, &right, &output).unwrap();

        assert_eq!(read_sorted_lines(&output), vec!["1, Carlos, IT"]);
    }

    /* ============
       PIPELINE COMPLETO (WordCount)
       ============ */

    #[test]
    fn pipeline_wordcount_compuesto_por_operadores() {
        let tmp = temp_dir("wordcount");
        let input = write_file(&tmp, "in.txt", "Hello World\nHello Go\nDistributed Systems\n");
        let flat = tmp.join("flat.txt").to_string_lossy().to_string();
        let low = tmp.join("low.txt").to_string_lossy().to_string();
        let agg = tmp.join("agg.txt").to_string_lossy().to_string();

        flat_map_lines(&[input], &flat, "tokenize").unwrap();
        map_lines(&[flat], &low, "to_lower").unwrap();
        reduce_by_key(&[low], &agg, 1000).unwrap();

        assert_eq!(
            read_sorted_lines(&agg),
            vec![
                "distributed, 1",
                "go, 1",
                "hello, 2",
                "systems, 1",
                "world, 1",
            ]
        );
    }

    #[test]
    fn spill_threshold_respeta_env_var() {
        env::set_var("SPILL_THRESHOLD", "42");
        assert_eq!(spill_threshold(), 42);
        env::remove_var("SPILL_THRESHOLD");
        assert_eq!(spill_threshold(), DEFAULT_SPILL_THRESHOLD);
    }
}
